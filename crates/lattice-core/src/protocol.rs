//! Wire protocol between a connection pool and an interpreter process.
//!
//! Every call is one request followed by exactly one response on the same
//! TCP connection. Messages are length-prefixed rkyv archives:
//! 4-byte length (u32 LE) + rkyv-encoded message.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use rkyv::de::Pool;
use rkyv::rancor::{self, Strategy};
use rkyv::ser::Serializer;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::ser::sharing::Share;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interpreter::result::{Code, ResultType};
use crate::resource::ResourceInfo;

/// Largest message either side will accept.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Identifies a paragraph whose runner can be triggered from the process.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RunnerRef {
    pub note_id: String,
    pub paragraph_id: String,
}

/// Paragraph context shipped with interpret, cancel and progress calls.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct RemoteContext {
    pub note_id: String,
    pub paragraph_id: String,
    pub paragraph_title: String,
    pub paragraph_text: String,
    /// Paragraph config map as a JSON object.
    pub config_json: String,
    /// GUI state (`params` and `forms`) as JSON.
    pub gui_json: String,
    pub runners: Vec<RunnerRef>,
}

/// Result of an interpret call, with the context state the interpreter left behind.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RemoteResult {
    pub code: Code,
    pub result_type: ResultType,
    pub message: String,
    pub config_json: String,
    pub gui_json: String,
}

/// An angular object as carried by events and update calls.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct AngularObjectData {
    pub name: String,
    pub note_id: Option<String>,
    pub paragraph_id: Option<String>,
    /// JSON encoded value.
    pub value_json: String,
}

/// Event produced inside an interpreter process and drained by the event poller.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum RemoteEvent {
    /// Nothing happened within the poll window.
    NoOp,

    AngularObjectAdd(AngularObjectData),

    AngularObjectUpdate(AngularObjectData),

    AngularObjectRemove {
        name: String,
        note_id: Option<String>,
        paragraph_id: Option<String>,
    },

    /// Ask the front-end to run a paragraph.
    RunContextRunner {
        note_id: String,
        paragraph_id: String,
    },

    /// Ask every other resource pool for resources matching the pattern.
    ResourcePoolSearch {
        request_id: u64,
        location: String,
        name_pattern: String,
    },

    /// Ask every other resource pool for one resource's payload.
    ResourcePoolGet {
        request_id: u64,
        location: String,
        name: String,
    },
}

impl RemoteEvent {
    /// Event type name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteEvent::NoOp => "NO_OP",
            RemoteEvent::AngularObjectAdd(_) => "ANGULAR_OBJECT_ADD",
            RemoteEvent::AngularObjectUpdate(_) => "ANGULAR_OBJECT_UPDATE",
            RemoteEvent::AngularObjectRemove { .. } => "ANGULAR_OBJECT_REMOVE",
            RemoteEvent::RunContextRunner { .. } => "RUN_INTERPRETER_CONTEXT_RUNNER",
            RemoteEvent::ResourcePoolSearch { .. } => "RESOURCE_POOL_SEARCH",
            RemoteEvent::ResourcePoolGet { .. } => "RESOURCE_POOL_GET",
        }
    }
}

/// Call sent from a connection pool to an interpreter process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum Request {
    /// Instantiate an interpreter. Idempotent per class name.
    CreateInterpreter {
        class_name: String,
        properties: HashMap<String, String>,
    },

    Open {
        class_name: String,
    },

    Close {
        class_name: String,
    },

    Interpret {
        class_name: String,
        script: String,
        context: RemoteContext,
    },

    Cancel {
        class_name: String,
        context: RemoteContext,
    },

    GetProgress {
        class_name: String,
        context: RemoteContext,
    },

    GetFormType {
        class_name: String,
    },

    Completion {
        class_name: String,
        buf: String,
        cursor: u32,
    },

    /// Status of a job by id, across every scheduler of the process.
    GetStatus {
        job_id: String,
    },

    /// Next queued event, waiting up to the process's event poll timeout.
    GetEvent,

    AngularObjectAdd(AngularObjectData),

    AngularObjectUpdate {
        name: String,
        note_id: Option<String>,
        paragraph_id: Option<String>,
        /// `None` clears the value.
        value_json: Option<String>,
    },

    AngularObjectRemove {
        name: String,
        note_id: Option<String>,
        paragraph_id: Option<String>,
    },

    /// Search the process's own resource pool.
    ResourcePoolSearch {
        name_pattern: String,
    },

    /// Payload of a resource in the process's own pool.
    ResourcePoolGet {
        name: String,
    },

    /// Reply to a relayed search.
    ResourcePoolInfo {
        request_id: u64,
        location: String,
        name_pattern: String,
        infos: Vec<ResourceInfo>,
    },

    /// Reply to a relayed get.
    ResourcePoolObject {
        request_id: u64,
        location: String,
        name: String,
        payload: Option<Vec<u8>>,
    },

    GetResourcePoolId,

    /// Close every interpreter and stop the process's server.
    Shutdown,
}

/// Answer from an interpreter process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum Response {
    Ok,

    Result(RemoteResult),

    Cancelled {
        supported: bool,
    },

    Progress(i32),

    FormType(String),

    Completion(Vec<String>),

    Status(String),

    Event(RemoteEvent),

    ResourceInfos(Vec<ResourceInfo>),

    ResourcePayload(Option<Vec<u8>>),

    PoolId(String),

    /// The call failed inside the process.
    Error {
        message: String,
    },
}

type EncodeStrategy<'a> = Strategy<Serializer<AlignedVec, ArenaHandle<'a>, Share>, rancor::Error>;
type DecodeStrategy = Strategy<Pool, rancor::Error>;

/// Bytes of the little-endian length in front of every frame body.
const FRAME_HEADER_LEN: usize = 4;

fn transport(what: &'static str) -> impl Fn(io::Error) -> Error {
    move |e| Error::Transport(format!("{}: {}", what, e))
}

/// Send one frame and flush it, so the peer never waits on a partial call.
fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(Error::Serialization(format!(
            "message of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    let header = (body.len() as u32).to_le_bytes();
    writer.write_all(&header).map_err(transport("cannot send frame header"))?;
    writer.write_all(body).map_err(transport("cannot send frame body"))?;
    writer.flush().map_err(transport("cannot flush frame"))
}

/// Receive one frame body into storage aligned for archive access.
fn read_frame<R: Read>(reader: &mut R) -> Result<AlignedVec> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader
        .read_exact(&mut header)
        .map_err(transport("cannot receive frame header"))?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Transport(format!(
            "peer announced {} bytes, over the {} byte limit",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut body = AlignedVec::with_capacity(len);
    body.resize(len, 0);
    reader
        .read_exact(&mut body)
        .map_err(transport("cannot receive frame body"))?;
    Ok(body)
}

/// Encode `message` and send it as one frame.
pub fn write_message<W: Write, M>(writer: &mut W, message: &M) -> Result<()>
where
    M: for<'a> Serialize<EncodeStrategy<'a>>,
{
    let body = rkyv::to_bytes::<rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("cannot encode message: {}", e)))?;
    write_frame(writer, &body)
}

/// Receive one frame and decode it as `M`.
///
/// Decoding skips validation; both ends of a connection are lattice
/// processes.
pub fn read_message<R: Read, M>(reader: &mut R) -> Result<M>
where
    M: Archive,
    M::Archived: Deserialize<M, DecodeStrategy>,
{
    let body = read_frame(reader)?;
    // SAFETY: the frame was written by `write_message` for the same type.
    unsafe { rkyv::from_bytes_unchecked::<M, rancor::Error>(&body) }
        .map_err(|e| Error::Serialization(format!("cannot decode message: {}", e)))
}

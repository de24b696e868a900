//! Blocking RPC client for one connection to an interpreter process.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{
    AngularObjectData, RemoteContext, RemoteEvent, RemoteResult, Request, Response, read_message,
    write_message,
};
use crate::resource::ResourceInfo;

/// One TCP connection speaking the wire protocol.
///
/// After a transport failure the client is marked broken and refuses further
/// calls; the pool discards broken clients instead of returning them.
pub struct RuntimeClient {
    addr: SocketAddr,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    broken: bool,
}

impl RuntimeClient {
    /// Connect within `connect_timeout`. `call_timeout` bounds how long each
    /// call may wait on the socket; `None` waits as long as the call runs.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        call_timeout: Option<Duration>,
    ) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Transport(format!("cannot resolve {}:{}", host, port)))?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| Error::Transport(format!("failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);

        let mut client = Self {
            addr,
            reader,
            writer: BufWriter::new(stream),
            broken: false,
        };
        client.set_call_timeout(call_timeout)?;
        Ok(client)
    }

    /// Bound the time each call may block on reading or writing.
    ///
    /// A call that runs out of time fails with [`Error::Transport`] and
    /// leaves the client broken.
    pub fn set_call_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let stream = self.writer.get_ref();
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Close the connection; the client cannot be used afterwards.
    pub fn close(&mut self) {
        self.broken = true;
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }

    /// Send a request and wait for its response.
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        if self.broken {
            return Err(Error::Transport(format!("connection to {} is closed", self.addr)));
        }
        let outcome = write_message(&mut self.writer, request)
            .and_then(|_| read_message::<_, Response>(&mut self.reader));
        match outcome {
            Ok(Response::Error { message }) => Err(Error::Remote(message)),
            Ok(response) => Ok(response),
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    fn call_ok(&mut self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn create_interpreter(&mut self, class_name: &str, properties: &HashMap<String, String>) -> Result<()> {
        self.call_ok(&Request::CreateInterpreter {
            class_name: class_name.to_string(),
            properties: properties.clone(),
        })
    }

    pub fn open(&mut self, class_name: &str) -> Result<()> {
        self.call_ok(&Request::Open {
            class_name: class_name.to_string(),
        })
    }

    pub fn close_interpreter(&mut self, class_name: &str) -> Result<()> {
        self.call_ok(&Request::Close {
            class_name: class_name.to_string(),
        })
    }

    pub fn interpret(&mut self, class_name: &str, script: &str, context: RemoteContext) -> Result<RemoteResult> {
        match self.call(&Request::Interpret {
            class_name: class_name.to_string(),
            script: script.to_string(),
            context,
        })? {
            Response::Result(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Whether the interpreter supported the cancel request.
    pub fn cancel(&mut self, class_name: &str, context: RemoteContext) -> Result<bool> {
        match self.call(&Request::Cancel {
            class_name: class_name.to_string(),
            context,
        })? {
            Response::Cancelled { supported } => Ok(supported),
            other => Err(unexpected(other)),
        }
    }

    pub fn progress(&mut self, class_name: &str, context: RemoteContext) -> Result<i32> {
        match self.call(&Request::GetProgress {
            class_name: class_name.to_string(),
            context,
        })? {
            Response::Progress(progress) => Ok(progress),
            other => Err(unexpected(other)),
        }
    }

    pub fn form_type(&mut self, class_name: &str) -> Result<String> {
        match self.call(&Request::GetFormType {
            class_name: class_name.to_string(),
        })? {
            Response::FormType(form) => Ok(form),
            other => Err(unexpected(other)),
        }
    }

    pub fn completion(&mut self, class_name: &str, buf: &str, cursor: usize) -> Result<Vec<String>> {
        match self.call(&Request::Completion {
            class_name: class_name.to_string(),
            buf: buf.to_string(),
            cursor: cursor as u32,
        })? {
            Response::Completion(candidates) => Ok(candidates),
            other => Err(unexpected(other)),
        }
    }

    pub fn status(&mut self, job_id: &str) -> Result<String> {
        match self.call(&Request::GetStatus {
            job_id: job_id.to_string(),
        })? {
            Response::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub fn get_event(&mut self) -> Result<RemoteEvent> {
        match self.call(&Request::GetEvent)? {
            Response::Event(event) => Ok(event),
            other => Err(unexpected(other)),
        }
    }

    pub fn angular_object_add(&mut self, data: AngularObjectData) -> Result<()> {
        self.call_ok(&Request::AngularObjectAdd(data))
    }

    pub fn angular_object_update(
        &mut self,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
        value_json: Option<String>,
    ) -> Result<()> {
        self.call_ok(&Request::AngularObjectUpdate {
            name: name.to_string(),
            note_id: note_id.map(str::to_string),
            paragraph_id: paragraph_id.map(str::to_string),
            value_json,
        })
    }

    pub fn angular_object_remove(&mut self, name: &str, note_id: Option<&str>, paragraph_id: Option<&str>) -> Result<()> {
        self.call_ok(&Request::AngularObjectRemove {
            name: name.to_string(),
            note_id: note_id.map(str::to_string),
            paragraph_id: paragraph_id.map(str::to_string),
        })
    }

    /// Search the process's own resource pool.
    pub fn resource_pool_search(&mut self, name_pattern: &str) -> Result<Vec<ResourceInfo>> {
        match self.call(&Request::ResourcePoolSearch {
            name_pattern: name_pattern.to_string(),
        })? {
            Response::ResourceInfos(infos) => Ok(infos),
            other => Err(unexpected(other)),
        }
    }

    /// Payload of a resource in the process's own pool.
    pub fn resource_pool_get(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.call(&Request::ResourcePoolGet {
            name: name.to_string(),
        })? {
            Response::ResourcePayload(payload) => Ok(payload),
            other => Err(unexpected(other)),
        }
    }

    pub fn resource_pool_info(
        &mut self,
        request_id: u64,
        location: &str,
        name_pattern: &str,
        infos: Vec<ResourceInfo>,
    ) -> Result<()> {
        self.call_ok(&Request::ResourcePoolInfo {
            request_id,
            location: location.to_string(),
            name_pattern: name_pattern.to_string(),
            infos,
        })
    }

    pub fn resource_pool_object(
        &mut self,
        request_id: u64,
        location: &str,
        name: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<()> {
        self.call_ok(&Request::ResourcePoolObject {
            request_id,
            location: location.to_string(),
            name: name.to_string(),
            payload,
        })
    }

    pub fn resource_pool_id(&mut self) -> Result<String> {
        match self.call(&Request::GetResourcePoolId)? {
            Response::PoolId(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the process to close its interpreters and stop serving.
    pub fn shutdown(&mut self) -> Result<()> {
        self.call_ok(&Request::Shutdown)
    }
}

fn unexpected(response: Response) -> Error {
    Error::Transport(format!("unexpected response: {:?}", response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    /// A peer that accepts connections but never answers.
    fn silent_peer() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_call_times_out_on_silent_peer() {
        let (listener, port) = silent_peer();
        let accepted = thread::spawn(move || listener.accept().map(|(stream, _)| stream));

        let mut client = RuntimeClient::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        let _peer = accepted.join().unwrap().unwrap();

        let start = Instant::now();
        assert!(matches!(client.shutdown(), Err(Error::Transport(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(client.is_broken());
        assert!(matches!(client.resource_pool_id(), Err(Error::Transport(_))));
    }

    #[test]
    fn test_call_timeout_can_be_set_after_connect() {
        let (listener, port) = silent_peer();
        let accepted = thread::spawn(move || listener.accept().map(|(stream, _)| stream));

        let mut client =
            RuntimeClient::connect("127.0.0.1", port, Duration::from_secs(1), None).unwrap();
        let _peer = accepted.join().unwrap().unwrap();

        client.set_call_timeout(Some(Duration::from_millis(50))).unwrap();
        assert!(client.get_event().is_err());
    }

    #[test]
    fn test_connect_refused_is_transport_error() {
        let port = crate::process::net::find_available_port().unwrap();
        let result = RuntimeClient::connect("127.0.0.1", port, Duration::from_millis(200), None);
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}

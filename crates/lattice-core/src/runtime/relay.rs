//! Resource lookups that must leave the process.
//!
//! A process cannot reach other processes directly. It queues a
//! RESOURCE_POOL_SEARCH or RESOURCE_POOL_GET event carrying a fresh request
//! id, and blocks until the front-end calls back with the answer for that id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use super::outbox::EventOutbox;
use crate::protocol::RemoteEvent;
use crate::resource::{ResourceInfo, ResourceKey, ResourcePoolEventHandler, ResourceValue};

#[derive(Debug)]
enum Reply {
    Infos(Vec<ResourceInfo>),
    Payload(Option<Vec<u8>>),
}

/// One outstanding relayed lookup.
struct PendingCall {
    key: ResourceKey,
    reply: Mutex<Option<Reply>>,
    answered: Condvar,
}

impl PendingCall {
    fn wait(&self, timeout: Duration) -> Option<Reply> {
        let deadline = Instant::now() + timeout;
        let mut reply = self.reply.lock();
        while reply.is_none() {
            if self.answered.wait_until(&mut reply, deadline).timed_out() {
                break;
            }
        }
        reply.take()
    }
}

/// Outstanding relayed lookups keyed by request id.
#[derive(Default)]
pub struct PendingCalls {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, Arc<PendingCall>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, key: ResourceKey) -> (u64, Arc<PendingCall>) {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let call = Arc::new(PendingCall {
            key,
            reply: Mutex::new(None),
            answered: Condvar::new(),
        });
        self.calls.lock().insert(request_id, call.clone());
        (request_id, call)
    }

    fn forget(&self, request_id: u64) {
        self.calls.lock().remove(&request_id);
    }

    fn complete(&self, request_id: u64, reply: Reply) -> bool {
        let Some(call) = self.calls.lock().remove(&request_id) else {
            warn!(request_id, "no pending resource call for reply");
            return false;
        };
        *call.reply.lock() = Some(reply);
        call.answered.notify_all();
        true
    }

    /// Deliver the answer to a relayed search.
    pub fn complete_search(&self, request_id: u64, infos: Vec<ResourceInfo>) -> bool {
        self.complete(request_id, Reply::Infos(infos))
    }

    /// Deliver the answer to a relayed get.
    pub fn complete_get(&self, request_id: u64, payload: Option<Vec<u8>>) -> bool {
        self.complete(request_id, Reply::Payload(payload))
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resource pool handler of an interpreter process.
pub struct RuntimeRelay {
    outbox: Arc<EventOutbox>,
    pending: Arc<PendingCalls>,
    timeout: Duration,
}

impl RuntimeRelay {
    pub fn new(outbox: Arc<EventOutbox>, pending: Arc<PendingCalls>, timeout: Duration) -> Self {
        Self {
            outbox,
            pending,
            timeout,
        }
    }

    fn call(&self, key: ResourceKey, event: impl FnOnce(u64) -> RemoteEvent) -> Option<Reply> {
        let (request_id, call) = self.pending.register(key);
        self.outbox.send(event(request_id));

        let reply = call.wait(self.timeout);
        if reply.is_none() {
            self.pending.forget(request_id);
            error!(resource = %call.key, request_id, "resource call timed out");
        }
        reply
    }
}

impl ResourcePoolEventHandler for RuntimeRelay {
    fn resource_pool_search(&self, location: &str, name_pattern: &str) -> Option<Vec<ResourceInfo>> {
        let key = ResourceKey::new(location, name_pattern);
        let reply = self.call(key, |request_id| RemoteEvent::ResourcePoolSearch {
            request_id,
            location: location.to_string(),
            name_pattern: name_pattern.to_string(),
        })?;
        match reply {
            Reply::Infos(infos) => Some(infos),
            Reply::Payload(_) => {
                warn!(location, name_pattern, "search answered with a payload");
                None
            }
        }
    }

    fn resource_pool_get_object(&self, location: &str, name: &str) -> Option<ResourceValue> {
        let key = ResourceKey::new(location, name);
        let reply = self.call(key, |request_id| RemoteEvent::ResourcePoolGet {
            request_id,
            location: location.to_string(),
            name: name.to_string(),
        })?;
        match reply {
            Reply::Payload(Some(bytes)) => match ResourceValue::from_bytes(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    error!(location, name, "cannot decode relayed resource: {}", e);
                    None
                }
            },
            Reply::Payload(None) => None,
            Reply::Infos(_) => {
                warn!(location, name, "get answered with search results");
                None
            }
        }
    }
}

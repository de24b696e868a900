//! Queue of events waiting to be drained by the front-end's event poller.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::warn;

use crate::angular::{AngularObject, AngularObjectListener};
use crate::protocol::{AngularObjectData, RemoteEvent};

#[derive(Default)]
pub struct EventOutbox {
    queue: Mutex<VecDeque<RemoteEvent>>,
    available: Condvar,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, event: RemoteEvent) {
        self.queue.lock().push_back(event);
        self.available.notify_all();
    }

    /// Oldest event, waiting up to `timeout`; `NoOp` if none arrived.
    pub fn poll(&self, timeout: Duration) -> RemoteEvent {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.available.wait_for(&mut queue, timeout);
        }
        queue.pop_front().unwrap_or(RemoteEvent::NoOp)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn object_data(object: &AngularObject) -> Option<AngularObjectData> {
    match serde_json::to_string(&object.value) {
        Ok(value_json) => Some(AngularObjectData {
            name: object.name.clone(),
            note_id: object.note_id.clone(),
            paragraph_id: object.paragraph_id.clone(),
            value_json,
        }),
        Err(e) => {
            warn!(name = %object.name, "cannot encode angular object: {}", e);
            None
        }
    }
}

/// Changes interpreters make to the process's registry become events.
impl AngularObjectListener for EventOutbox {
    fn on_add(&self, _group_id: &str, object: &AngularObject) {
        if let Some(data) = object_data(object) {
            self.send(RemoteEvent::AngularObjectAdd(data));
        }
    }

    fn on_update(&self, _group_id: &str, object: &AngularObject) {
        if let Some(data) = object_data(object) {
            self.send(RemoteEvent::AngularObjectUpdate(data));
        }
    }

    fn on_remove(
        &self,
        _group_id: &str,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
    ) {
        self.send(RemoteEvent::AngularObjectRemove {
            name: name.to_string(),
            note_id: note_id.map(str::to_string),
            paragraph_id: paragraph_id.map(str::to_string),
        });
    }
}

/// Parse an angular value; text that is not JSON is kept as a string.
pub(crate) fn parse_angular_value(json: &str) -> Value {
    serde_json::from_str(json).unwrap_or_else(|_| Value::String(json.to_string()))
}

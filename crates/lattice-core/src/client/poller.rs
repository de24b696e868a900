//! Background loop pulling events out of an interpreter process.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::connection::ConnectionPool;
use crate::error::Result;
use crate::protocol::RemoteEvent;
use crate::runtime::outbox::parse_angular_value;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Wait between checks while the process is down.
    pub idle_wait: Duration,
    /// Wait after a failed poll.
    pub error_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollerState {
    WaitingForProcess = 0,
    Polling = 1,
    Shutdown = 2,
}

impl PollerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PollerState::WaitingForProcess,
            1 => PollerState::Polling,
            _ => PollerState::Shutdown,
        }
    }
}

struct Shared {
    state: AtomicU8,
    stop: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn set_state(&self, state: PollerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        *self.stop.lock()
    }

    /// Sleep for `timeout` unless shutdown is requested first.
    fn pause(&self, timeout: Duration) {
        let mut stop = self.stop.lock();
        if !*stop {
            self.wake.wait_for(&mut stop, timeout);
        }
    }
}

/// Thread that drains the event queue of one process and dispatches each
/// event in the front-end.
pub struct EventPoller {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl EventPoller {
    pub fn start(pool: Weak<ConnectionPool>, config: PollerConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PollerState::WaitingForProcess as u8),
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });

        let name = match pool.upgrade() {
            Some(pool) => format!("event-poller-{}", pool.group_id()),
            None => "event-poller".to_string(),
        };
        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || poll_loop(pool, config, &loop_shared))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> PollerState {
        PollerState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Stop the loop and wait for the thread to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            error!("event poller thread panicked");
        }
    }
}

impl Drop for EventPoller {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn poll_loop(pool: Weak<ConnectionPool>, config: PollerConfig, shared: &Shared) {
    debug!("event poller started");
    while !shared.is_stopped() {
        let Some(pool) = pool.upgrade() else {
            break;
        };

        if !pool.is_running() {
            shared.set_state(PollerState::WaitingForProcess);
            drop(pool);
            shared.pause(config.idle_wait);
            continue;
        }
        shared.set_state(PollerState::Polling);

        let event = pool.get_client().and_then(|mut client| {
            let event = client.get_event();
            if event.is_err() {
                client.invalidate();
            }
            event
        });
        match event {
            Ok(RemoteEvent::NoOp) => {}
            Ok(event) => {
                if shared.is_stopped() {
                    warn!(event = event.kind(), "dropping event received during shutdown");
                    break;
                }
                dispatch(&pool, event);
            }
            Err(e) => {
                debug!(group = pool.group_id(), "event poll failed: {}", e);
                drop(pool);
                shared.pause(config.error_backoff);
            }
        }
    }
    shared.set_state(PollerState::Shutdown);
    debug!("event poller stopped");
}

/// Apply one event in the front-end.
///
/// Angular changes go to the local registry with `emit = true`, which
/// notifies the UI only; they are never sent back to the process.
fn dispatch(pool: &ConnectionPool, event: RemoteEvent) {
    debug!(group = pool.group_id(), event = event.kind(), "received event");
    match event {
        RemoteEvent::NoOp => {}
        RemoteEvent::AngularObjectAdd(data) => {
            let value = parse_angular_value(&data.value_json);
            pool.angular_registry().add(
                &data.name,
                value,
                data.note_id.as_deref(),
                data.paragraph_id.as_deref(),
                true,
            );
        }
        RemoteEvent::AngularObjectUpdate(data) => {
            let value = parse_angular_value(&data.value_json);
            let registry = pool.angular_registry();
            let note_id = data.note_id.as_deref();
            let paragraph_id = data.paragraph_id.as_deref();
            if registry
                .update(&data.name, note_id, paragraph_id, value.clone(), true)
                .is_none()
            {
                registry.add(&data.name, value, note_id, paragraph_id, true);
            }
        }
        RemoteEvent::AngularObjectRemove {
            name,
            note_id,
            paragraph_id,
        } => {
            pool.angular_registry()
                .remove(&name, note_id.as_deref(), paragraph_id.as_deref(), true);
        }
        RemoteEvent::RunContextRunner {
            note_id,
            paragraph_id,
        } => {
            info!(note_id, paragraph_id, "running paragraph on request of the process");
            pool.runner_pool().run(&note_id, &paragraph_id);
        }
        RemoteEvent::ResourcePoolSearch {
            request_id,
            location,
            name_pattern,
        } => {
            let infos = match pool.cluster() {
                Some(cluster) => cluster.search_all(Some(pool.group_id()), &location, &name_pattern),
                None => Vec::new(),
            };
            let reply = pool.get_client().and_then(|mut client| {
                client.resource_pool_info(request_id, &location, &name_pattern, infos)
            });
            if let Err(e) = reply {
                warn!(request_id, "failed to answer resource search: {}", e);
            }
        }
        RemoteEvent::ResourcePoolGet {
            request_id,
            location,
            name,
        } => {
            let payload = pool
                .cluster()
                .and_then(|cluster| cluster.get_from_all(Some(pool.group_id()), &location, &name));
            let reply = pool.get_client().and_then(|mut client| {
                client.resource_pool_object(request_id, &location, &name, payload)
            });
            if let Err(e) = reply {
                warn!(request_id, "failed to answer resource get: {}", e);
            }
        }
    }
}

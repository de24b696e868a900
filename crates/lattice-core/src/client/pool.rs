//! Bounded pool of RPC clients to one interpreter process.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::rpc::RuntimeClient;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ClientPoolConfig {
    /// Most connections open at once, idle or borrowed.
    pub max_total: usize,
    /// How long `checkout` waits for a connection to free up.
    pub borrow_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long one call may wait for its response. `None` waits as long as
    /// the call runs; a bound must exceed the process's event poll timeout.
    pub call_timeout: Option<Duration>,
}

impl Default for ClientPoolConfig {
    fn default() -> Self {
        Self {
            max_total: 8,
            borrow_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            call_timeout: None,
        }
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<RuntimeClient>,
    /// Borrowed clients plus connections being opened.
    active: usize,
    closed: bool,
}

/// Reusable connections to one host and port.
pub struct ClientPool {
    host: String,
    port: u16,
    config: ClientPoolConfig,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl ClientPool {
    pub fn new(host: impl Into<String>, port: u16, config: ClientPoolConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            state: Mutex::new(PoolState::default()),
            returned: Condvar::new(),
        }
    }

    /// Borrow a client, connecting a new one if below the limit.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledClient> {
        let deadline = Instant::now() + self.config.borrow_timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::PoolClosed);
            }
            if let Some(client) = state.idle.pop() {
                state.active += 1;
                return Ok(self.wrap(client));
            }
            if state.active < self.config.max_total {
                state.active += 1;
                break;
            }
            if self.returned.wait_until(&mut state, deadline).timed_out() {
                return Err(Error::PoolExhausted(self.config.borrow_timeout));
            }
        }
        drop(state);

        match RuntimeClient::connect(
            &self.host,
            self.port,
            self.config.connect_timeout,
            self.config.call_timeout,
        ) {
            Ok(client) => {
                debug!(host = %self.host, port = self.port, "opened client connection");
                Ok(self.wrap(client))
            }
            Err(e) => {
                self.release_slot();
                Err(e)
            }
        }
    }

    fn wrap(self: &Arc<Self>, client: RuntimeClient) -> PooledClient {
        PooledClient {
            client: Some(client),
            pool: self.clone(),
        }
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        self.returned.notify_one();
    }

    fn checkin(&self, mut client: RuntimeClient) {
        let mut state = self.state.lock();
        state.active -= 1;
        if state.closed || client.is_broken() {
            client.close();
        } else {
            state.idle.push(client);
        }
        self.returned.notify_one();
    }

    /// Close every idle connection.
    pub fn clear(&self) {
        let idle: Vec<RuntimeClient> = self.state.lock().idle.drain(..).collect();
        for mut client in idle {
            client.close();
        }
    }

    /// Refuse further checkouts and close idle connections. Borrowed clients
    /// are closed when they come back.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.clear();
        self.returned.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn num_active(&self) -> usize {
        self.state.lock().active
    }

    pub fn num_idle(&self) -> usize {
        self.state.lock().idle.len()
    }
}

/// A borrowed client, returned to its pool on drop.
pub struct PooledClient {
    client: Option<RuntimeClient>,
    pool: Arc<ClientPool>,
}

impl PooledClient {
    /// Close the connection so it is discarded instead of reused.
    pub fn invalidate(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.close();
        }
    }
}

impl Deref for PooledClient {
    type Target = RuntimeClient;

    fn deref(&self) -> &RuntimeClient {
        self.client.as_ref().expect("client is present until drop")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut RuntimeClient {
        self.client.as_mut().expect("client is present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.checkin(client);
        }
    }
}

//! Interpreter processes managed elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use super::{InterpreterProcess, net};

/// An already running interpreter process reachable at a known address.
///
/// Starting only checks reachability and stopping only detaches; the process
/// itself is never launched or killed from here.
pub struct RemoteInterpreterProcess {
    host: String,
    port: u16,
    connect_timeout: Duration,
    running: AtomicBool,
}

impl RemoteInterpreterProcess {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(30),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl InterpreterProcess for RemoteInterpreterProcess {
    fn start(&self) {
        let reachable = net::wait_for_endpoint(
            &self.host,
            self.port,
            self.connect_timeout,
            Duration::from_millis(100),
            || true,
        );
        if reachable {
            info!(host = %self.host, port = self.port, "attached to interpreter process");
        } else {
            warn!(host = %self.host, port = self.port, "interpreter process is not reachable");
        }
        self.running.store(reachable, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn owns_process(&self) -> bool {
        false
    }
}

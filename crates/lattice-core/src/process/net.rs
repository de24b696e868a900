//! Port allocation and reachability probes.

use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;

/// How long a single connection attempt may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A port that was free a moment ago.
pub fn find_available_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Whether something accepts connections on `host:port`.
pub fn endpoint_accessible(host: &str, port: u16) -> bool {
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
}

/// Probe `host:port` every `interval` until it accepts connections, `timeout`
/// expires, or `keep_waiting` returns false.
pub fn wait_for_endpoint(
    host: &str,
    port: u16,
    timeout: Duration,
    interval: Duration,
    keep_waiting: impl Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if endpoint_accessible(host, port) {
            return true;
        }
        if !keep_waiting() || Instant::now() >= deadline {
            debug!(host, port, "endpoint not reachable");
            return false;
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_available_port_is_bindable() {
        let port = find_available_port().unwrap();
        assert_ne!(port, 0);
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn test_endpoint_accessible() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(endpoint_accessible("127.0.0.1", port));

        drop(listener);
        assert!(!endpoint_accessible("127.0.0.1", port));
    }

    #[test]
    fn test_wait_gives_up_when_told() {
        let port = find_available_port().unwrap();
        let start = Instant::now();
        let reached = wait_for_endpoint(
            "127.0.0.1",
            port,
            Duration::from_secs(30),
            Duration::from_millis(10),
            || false,
        );
        assert!(!reached);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_sees_late_listener() {
        let port = find_available_port().unwrap();
        let binder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(listener);
        });

        assert!(wait_for_endpoint(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            Duration::from_millis(10),
            || true,
        ));
        binder.join().unwrap();
    }
}

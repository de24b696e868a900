//! TCP front of an [`InterpreterRuntime`].
//!
//! One thread per connection. Each connection carries one outstanding call at
//! a time; connection pools open several connections to call concurrently.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::InterpreterRuntime;
use crate::error::{Error, Result};
use crate::protocol::{Request, Response, read_message, write_message};

/// Stops a running server from another thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    addr: SocketAddr,
    serving: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }

    /// Ask the accept loop to exit.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.addr);
    }
}

pub struct RuntimeServer {
    runtime: Arc<InterpreterRuntime>,
    listener: TcpListener,
    handle: ServerHandle,
}

impl RuntimeServer {
    pub fn bind(addr: impl ToSocketAddrs, runtime: Arc<InterpreterRuntime>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let mut local = listener.local_addr()?;
        if local.ip().is_unspecified() {
            local.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        Ok(Self {
            runtime,
            listener,
            handle: ServerHandle {
                addr: local,
                serving: Arc::new(AtomicBool::new(false)),
                stop_requested: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn runtime(&self) -> &Arc<InterpreterRuntime> {
        &self.runtime
    }

    /// Accept connections until stopped.
    pub fn serve(self) -> Result<()> {
        self.handle.serving.store(true, Ordering::SeqCst);
        info!(addr = %self.handle.addr, group = %self.runtime.group_id(), "interpreter process listening");

        for stream in self.listener.incoming() {
            if self.handle.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let runtime = self.runtime.clone();
                    let handle = self.handle.clone();
                    let spawned = thread::Builder::new()
                        .name("runtime-connection".to_string())
                        .spawn(move || serve_connection(stream, &runtime, &handle));
                    if let Err(e) = spawned {
                        warn!("failed to spawn connection thread: {}", e);
                    }
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }

        self.handle.serving.store(false, Ordering::SeqCst);
        info!(addr = %self.handle.addr, "interpreter process stopped listening");
        Ok(())
    }

    /// Serve on a background thread.
    pub fn spawn(self) -> Result<(ServerHandle, JoinHandle<Result<()>>)> {
        let handle = self.handle();
        self.handle.serving.store(true, Ordering::SeqCst);
        let join = thread::Builder::new()
            .name("runtime-server".to_string())
            .spawn(move || self.serve())
            .map_err(|e| Error::Transport(format!("failed to spawn server thread: {}", e)))?;
        Ok((handle, join))
    }
}

fn serve_connection(stream: TcpStream, runtime: &InterpreterRuntime, handle: &ServerHandle) {
    let peer = stream.peer_addr().ok();
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = match stream.try_clone() {
        Ok(clone) => (BufReader::new(stream), BufWriter::new(clone)),
        Err(e) => {
            warn!("failed to clone connection: {}", e);
            return;
        }
    };

    loop {
        let request: Request = match read_message(&mut reader) {
            Ok(request) => request,
            Err(e) => {
                debug!(?peer, "connection closed: {}", e);
                return;
            }
        };

        let shutdown = matches!(request, Request::Shutdown);
        let response: Response = runtime.handle(request);
        if let Err(e) = write_message(&mut writer, &response) {
            debug!(?peer, "failed to answer: {}", e);
            return;
        }

        if shutdown {
            info!("shutdown requested");
            handle.stop();
            return;
        }
    }
}

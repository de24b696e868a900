//! Supervision of interpreter processes.
//!
//! An [`InterpreterProcess`] is something that, once started, listens on a
//! host and port for the wire protocol. [`LocalInterpreterProcess`] launches
//! and owns a child process; [`RemoteInterpreterProcess`] attaches to one that
//! somebody else manages.

pub mod local;
pub mod net;
pub mod remote;

pub use local::{LaunchConfig, LocalInterpreterProcess};
pub use remote::RemoteInterpreterProcess;

/// A process hosting an interpreter runtime.
///
/// `start` never fails loudly: a process that could not be launched or did
/// not become reachable in time is simply not running afterwards.
pub trait InterpreterProcess: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn host(&self) -> String;

    fn port(&self) -> u16;

    fn is_running(&self) -> bool;

    /// Whether stopping this handle terminates the process itself.
    fn owns_process(&self) -> bool {
        true
    }
}

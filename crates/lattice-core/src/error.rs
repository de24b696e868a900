//! Error types for lattice-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for lattice-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lattice-core.
#[derive(Debug, Error)]
pub enum Error {
    /// No interpreter instance with this class name exists in the process.
    #[error("interpreter not found: {0}")]
    InterpreterNotFound(String),

    /// The factory has no constructor registered for this class name.
    #[error("unknown interpreter class: {0}")]
    UnknownInterpreterClass(String),

    /// An interpreter failed while servicing a request.
    #[error("interpreter error: {0}")]
    Interpreter(String),

    /// Wire encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection to an interpreter process failed mid-call.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer answered with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The interpreter process is not running.
    #[error("interpreter process is not running")]
    ProcessNotRunning,

    /// No client became available within the borrow timeout.
    #[error("no client available after {0:?}")]
    PoolExhausted(Duration),

    /// The client pool has been closed.
    #[error("client pool is closed")]
    PoolClosed,

    /// A resource name pattern is not a valid regular expression.
    #[error("invalid resource name pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Scheduler failure (thread spawn, submit after stop).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// A result was expected to carry a table.
    #[error("result is not a table")]
    NotTable,
}

impl Error {
    /// Whether the failure happened on the connection itself.
    ///
    /// A pooled connection that produced such an error must not be reused.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Io(_) | Error::Serialization(_)
        )
    }
}

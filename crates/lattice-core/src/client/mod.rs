//! The front-end side of an interpreter process.
//!
//! A [`ConnectionPool`] owns everything the front-end keeps per process: the
//! process handle, a pool of RPC clients, the event poller and the runners
//! that events may trigger. [`RemoteInterpreter`] sits on top and makes a
//! remote interpreter look like a local one.

pub mod connection;
pub mod group;
pub mod poller;
pub mod pool;
pub mod remote_interpreter;
pub mod rpc;
pub mod runner;

pub use connection::{ConnectionPool, ConnectionPoolConfig};
pub use group::{InterpreterGroup, InterpreterDefinition};
pub use poller::{EventPoller, PollerConfig, PollerState};
pub use pool::{ClientPool, ClientPoolConfig, PooledClient};
pub use remote_interpreter::RemoteInterpreter;
pub use rpc::RuntimeClient;
pub use runner::ContextRunnerPool;

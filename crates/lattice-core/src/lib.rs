//! Core of the Lattice remote interpreter system.
//!
//! This crate provides:
//! - Interpreter contract, results and per-paragraph context
//! - Job scheduling (FIFO and parallel) inside interpreter processes
//! - Process runtime serving interpreters over a framed TCP protocol
//! - Process supervision for local and externally managed processes
//! - Reference-counted connection pools with event polling
//! - Resource pools shared across every process of a cluster

pub mod angular;
pub mod client;
pub mod cluster;
pub mod error;
pub mod interpreter;
pub mod process;
pub mod protocol;
pub mod resource;
pub mod runtime;
pub mod scheduler;

pub use angular::{AngularObject, AngularObjectListener, AngularObjectRegistry};
pub use client::{
    ConnectionPool, ConnectionPoolConfig, InterpreterGroup, RemoteInterpreter, RuntimeClient,
};
pub use cluster::Cluster;
pub use error::{Error, Result};
pub use interpreter::{
    Code, FormType, Interpreter, InterpreterContext, InterpreterFactory, InterpreterResult,
    Properties, ResultType, TableData,
};
pub use process::{InterpreterProcess, LaunchConfig, LocalInterpreterProcess, RemoteInterpreterProcess};
pub use resource::{ResourceInfo, ResourcePool, ResourceValue};
pub use runtime::{InterpreterRuntime, RuntimeConfig, RuntimeServer, ServerHandle};
pub use scheduler::{Job, JobStatus, Scheduler, SchedulerRegistry};

//! The interpreter contract and its supporting types.
//!
//! An [`Interpreter`] evaluates code fragments for one language. Instances
//! live inside an interpreter process and are driven by the process runtime;
//! the front-end talks to them through [`crate::client::RemoteInterpreter`],
//! which implements the same trait.

pub mod builtin;
pub mod context;
pub mod factory;
pub mod result;
pub mod table;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub use context::{ContextRunner, Gui, InterpreterContext, InterpreterOutput};
pub use factory::InterpreterFactory;
pub use result::{Code, InterpreterResult, ResultType};
pub use table::{ColumnDef, TableData};

/// Interpreter construction properties.
pub type Properties = HashMap<String, String>;

/// How the front-end renders dynamic forms for an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormType {
    /// The interpreter manages forms itself through the GUI state.
    Native,
    Simple,
    None,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Native => "NATIVE",
            FormType::Simple => "SIMPLE",
            FormType::None => "NONE",
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NATIVE" => Ok(FormType::Native),
            "SIMPLE" => Ok(FormType::Simple),
            "NONE" => Ok(FormType::None),
            other => Err(Error::Interpreter(format!("unknown form type: {}", other))),
        }
    }
}

/// Answer to a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The interpreter cannot interrupt running work.
    NotSupported,
}

/// Which scheduler runs an interpreter's jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// One job at a time, in submission order.
    Fifo,
    /// Up to `n` jobs at once.
    Parallel(usize),
}

/// A language interpreter.
///
/// `open` is called at most once before the first `interpret`; `close` when
/// the interpreter is torn down.
pub trait Interpreter: Send + Sync {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn interpret(&self, script: &str, context: &InterpreterContext) -> Result<InterpreterResult>;

    fn cancel(&self, _context: &InterpreterContext) -> Result<CancelOutcome> {
        Ok(CancelOutcome::NotSupported)
    }

    /// Progress of the running paragraph, 0 to 100.
    fn progress(&self, _context: &InterpreterContext) -> Result<i32> {
        Ok(0)
    }

    fn form_type(&self) -> Result<FormType> {
        Ok(FormType::Native)
    }

    fn completion(&self, _buf: &str, _cursor: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn scheduler_kind(&self) -> SchedulerKind {
        SchedulerKind::Fifo
    }
}

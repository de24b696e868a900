//! Front-end proxy for an interpreter living in an interpreter process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::connection::ConnectionPool;
use super::group::InterpreterGroup;
use crate::error::Result;
use crate::interpreter::{
    CancelOutcome, FormType, Gui, Interpreter, InterpreterContext, InterpreterResult, Properties,
};
use crate::protocol::{RemoteContext, RunnerRef};

/// An [`Interpreter`] whose work is done by a remote process.
///
/// Opening takes a reference on the group's connection pool, so the process
/// starts with the first opened member and stops after the last one closes.
pub struct RemoteInterpreter {
    class_name: String,
    properties: Properties,
    group: Arc<InterpreterGroup>,
    connection: Arc<ConnectionPool>,
    opened: AtomicBool,
    form_type: OnceLock<FormType>,
}

impl RemoteInterpreter {
    /// Create the proxy and register it as a member of `group`.
    pub fn new(
        class_name: impl Into<String>,
        properties: Properties,
        group: Arc<InterpreterGroup>,
        connection: Arc<ConnectionPool>,
    ) -> Self {
        let class_name = class_name.into();
        group.add(class_name.clone(), properties.clone());
        Self {
            class_name,
            properties,
            group,
            connection,
            opened: AtomicBool::new(false),
            form_type: OnceLock::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn connection(&self) -> &Arc<ConnectionPool> {
        &self.connection
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Status of a job in the process, by paragraph id.
    pub fn job_status(&self, job_id: &str) -> Result<String> {
        self.connection.get_client()?.status(job_id)
    }

    fn remote_context(&self, context: &InterpreterContext) -> Result<RemoteContext> {
        Ok(RemoteContext {
            note_id: context.note_id().to_string(),
            paragraph_id: context.paragraph_id().to_string(),
            paragraph_title: context.paragraph_title().to_string(),
            paragraph_text: context.paragraph_text().to_string(),
            config_json: serde_json::to_string(&*context.config())?,
            gui_json: serde_json::to_string(&*context.gui())?,
            runners: context
                .runners()
                .iter()
                .map(|runner| RunnerRef {
                    note_id: runner.note_id().to_string(),
                    paragraph_id: runner.paragraph_id().to_string(),
                })
                .collect(),
        })
    }
}

impl Interpreter for RemoteInterpreter {
    fn open(&self) -> Result<()> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let count = match self.connection.reference() {
            Ok(count) => count,
            Err(e) => {
                self.opened.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let created = (|| -> Result<()> {
            let mut client = self.connection.get_client()?;
            if count == 1 {
                info!(group = self.group.id(), "creating interpreters of group");
                for member in self.group.members() {
                    client.create_interpreter(&member.class_name, &member.properties)?;
                }
            }
            client.create_interpreter(&self.class_name, &self.properties)
        })();

        if let Err(e) = created {
            self.opened.store(false, Ordering::SeqCst);
            self.connection.dereference();
            return Err(e);
        }
        debug!(class = %self.class_name, "opened remote interpreter");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.opened.swap(false, Ordering::SeqCst) {
            self.connection.dereference();
            debug!(class = %self.class_name, "closed remote interpreter");
        }
        Ok(())
    }

    fn interpret(&self, script: &str, context: &InterpreterContext) -> Result<InterpreterResult> {
        let form_type = self.form_type()?;
        self.connection
            .runner_pool()
            .replace(context.note_id(), context.runners());

        let remote = self.remote_context(context)?;
        let result = self
            .connection
            .get_client()?
            .interpret(&self.class_name, script, remote)?;

        if !result.config_json.trim().is_empty() {
            let config: Map<String, Value> = serde_json::from_str(&result.config_json)?;
            *context.config() = config;
        }
        if form_type == FormType::Native {
            *context.gui() = Gui::from_json(&result.gui_json)?;
        }

        Ok(InterpreterResult::with_type(
            result.code,
            result.result_type,
            result.message,
        ))
    }

    fn cancel(&self, context: &InterpreterContext) -> Result<CancelOutcome> {
        if !self.connection.is_running() {
            return Ok(CancelOutcome::NotSupported);
        }
        let remote = self.remote_context(context)?;
        let supported = self
            .connection
            .get_client()?
            .cancel(&self.class_name, remote)?;
        Ok(if supported {
            CancelOutcome::Cancelled
        } else {
            CancelOutcome::NotSupported
        })
    }

    fn progress(&self, context: &InterpreterContext) -> Result<i32> {
        if !self.connection.is_running() {
            return Ok(0);
        }
        let remote = self.remote_context(context)?;
        self.connection
            .get_client()?
            .progress(&self.class_name, remote)
    }

    fn form_type(&self) -> Result<FormType> {
        if let Some(form_type) = self.form_type.get() {
            return Ok(*form_type);
        }
        let form_type: FormType = self
            .connection
            .get_client()?
            .form_type(&self.class_name)?
            .parse()?;
        Ok(*self.form_type.get_or_init(|| form_type))
    }

    fn completion(&self, buf: &str, cursor: usize) -> Result<Vec<String>> {
        self.connection
            .get_client()?
            .completion(&self.class_name, buf, cursor)
    }
}

impl Drop for RemoteInterpreter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

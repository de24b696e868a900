//! The server half of an interpreter process.
//!
//! [`InterpreterRuntime`] owns the interpreter instances of one interpreter
//! group, their schedulers, the process's resource pool, its variable
//! registry and the outbox of events waiting for the front-end.
//! [`RuntimeServer`](server::RuntimeServer) exposes it over TCP.

pub mod outbox;
pub mod relay;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::angular::AngularObjectRegistry;
use crate::error::{Error, Result};
use crate::interpreter::context::{ContextRunner, Gui, InterpreterContext};
use crate::interpreter::{
    CancelOutcome, Code, FormType, Interpreter, InterpreterFactory, InterpreterResult, Properties,
    ResultType, SchedulerKind, TableData,
};
use crate::protocol::{AngularObjectData, RemoteContext, RemoteEvent, RemoteResult, Request, Response};
use crate::resource::well_known::{self, INSTANCE_RESULT, WellKnownResource};
use crate::resource::{ResourceInfo, ResourcePool};
use crate::scheduler::{
    Job, JobListener, JobStatus, Scheduler, SchedulerRegistry, StatusWaiter, error_chain,
};

pub use outbox::EventOutbox;
pub use relay::{PendingCalls, RuntimeRelay};
pub use server::{RuntimeServer, ServerHandle};

/// Timing of an interpreter process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long `GetEvent` waits for an event before answering `NoOp`.
    pub event_poll_timeout: Duration,
    /// How long a relayed resource lookup waits for its reply.
    pub resource_call_timeout: Duration,
    /// Interval at which a blocked interpret call re-checks its job.
    pub job_poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_poll_timeout: Duration::from_secs(1),
            resource_call_timeout: Duration::from_secs(60),
            job_poll_interval: Duration::from_secs(1),
        }
    }
}

/// An interpreter instance with its scheduler.
struct InterpreterSlot {
    class_name: String,
    interpreter: Box<dyn Interpreter>,
    opened: Mutex<bool>,
    scheduler: Arc<Scheduler>,
}

impl InterpreterSlot {
    /// Open on first use.
    fn ensure_open(&self) -> Result<()> {
        let mut opened = self.opened.lock();
        if !*opened {
            info!(interpreter = %self.class_name, "opening interpreter");
            self.interpreter.open()?;
            *opened = true;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut opened = self.opened.lock();
        if *opened {
            *opened = false;
            self.interpreter.close()?;
        }
        Ok(())
    }
}

/// Runner that asks the front-end to run a paragraph.
struct ParagraphRunner {
    note_id: String,
    paragraph_id: String,
    outbox: Arc<EventOutbox>,
}

impl ContextRunner for ParagraphRunner {
    fn note_id(&self) -> &str {
        &self.note_id
    }

    fn paragraph_id(&self) -> &str {
        &self.paragraph_id
    }

    fn run(&self) {
        self.outbox.send(RemoteEvent::RunContextRunner {
            note_id: self.note_id.clone(),
            paragraph_id: self.paragraph_id.clone(),
        });
    }
}

/// Interpreters and shared state of one interpreter process.
pub struct InterpreterRuntime {
    group_id: String,
    factory: InterpreterFactory,
    config: RuntimeConfig,
    interpreters: Mutex<Vec<Arc<InterpreterSlot>>>,
    /// One scheduler per interpreter class, named after it.
    schedulers: SchedulerRegistry,
    angular_registry: Arc<AngularObjectRegistry>,
    resource_pool: Arc<ResourcePool>,
    outbox: Arc<EventOutbox>,
    pending: Arc<PendingCalls>,
}

impl InterpreterRuntime {
    pub fn new(group_id: impl Into<String>, factory: InterpreterFactory, config: RuntimeConfig) -> Self {
        let group_id = group_id.into();
        let outbox = Arc::new(EventOutbox::new());
        let pending = Arc::new(PendingCalls::new());
        let relay = RuntimeRelay::new(outbox.clone(), pending.clone(), config.resource_call_timeout);

        Self {
            angular_registry: Arc::new(AngularObjectRegistry::new(
                group_id.clone(),
                Some(outbox.clone()),
            )),
            resource_pool: Arc::new(ResourcePool::new(Some(Arc::new(relay)))),
            group_id,
            factory,
            config,
            interpreters: Mutex::new(Vec::new()),
            schedulers: SchedulerRegistry::new(),
            outbox,
            pending,
        }
    }

    pub fn schedulers(&self) -> &SchedulerRegistry {
        &self.schedulers
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn resource_pool(&self) -> &Arc<ResourcePool> {
        &self.resource_pool
    }

    pub fn angular_registry(&self) -> &Arc<AngularObjectRegistry> {
        &self.angular_registry
    }

    pub fn outbox(&self) -> &Arc<EventOutbox> {
        &self.outbox
    }

    /// Class names of the instantiated interpreters, in creation order.
    pub fn interpreter_names(&self) -> Vec<String> {
        self.interpreters
            .lock()
            .iter()
            .map(|slot| slot.class_name.clone())
            .collect()
    }

    fn slot(&self, class_name: &str) -> Result<Arc<InterpreterSlot>> {
        self.interpreters
            .lock()
            .iter()
            .find(|slot| slot.class_name == class_name)
            .cloned()
            .ok_or_else(|| Error::InterpreterNotFound(class_name.to_string()))
    }

    /// Instantiate an interpreter. A second call for the same class is a no-op.
    pub fn create_interpreter(&self, class_name: &str, properties: &Properties) -> Result<()> {
        let mut interpreters = self.interpreters.lock();
        if interpreters.iter().any(|slot| slot.class_name == class_name) {
            debug!(interpreter = %class_name, "interpreter already created");
            return Ok(());
        }

        let interpreter = self.factory.create(class_name, properties)?;
        let scheduler = match interpreter.scheduler_kind() {
            SchedulerKind::Fifo => self.schedulers.create_or_get_fifo(class_name)?,
            SchedulerKind::Parallel(n) => self.schedulers.create_or_get_parallel(class_name, n)?,
        };
        info!(interpreter = %class_name, group = %self.group_id, "instantiated interpreter");
        interpreters.push(Arc::new(InterpreterSlot {
            class_name: class_name.to_string(),
            interpreter,
            opened: Mutex::new(false),
            scheduler,
        }));
        Ok(())
    }

    pub fn open(&self, class_name: &str) -> Result<()> {
        self.slot(class_name)?.ensure_open()
    }

    pub fn close(&self, class_name: &str) -> Result<()> {
        self.slot(class_name)?.close()
    }

    fn context(&self, remote: &RemoteContext) -> Result<InterpreterContext> {
        let config = if remote.config_json.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&remote.config_json)?
        };
        let runners: Vec<Arc<dyn ContextRunner>> = remote
            .runners
            .iter()
            .map(|runner| {
                Arc::new(ParagraphRunner {
                    note_id: runner.note_id.clone(),
                    paragraph_id: runner.paragraph_id.clone(),
                    outbox: self.outbox.clone(),
                }) as Arc<dyn ContextRunner>
            })
            .collect();

        Ok(InterpreterContext::new(&remote.note_id, &remote.paragraph_id)
            .with_title(&remote.paragraph_title)
            .with_text(&remote.paragraph_text)
            .with_config(config)
            .with_gui(Gui::from_json(&remote.gui_json)?)
            .with_angular_registry(self.angular_registry.clone())
            .with_runners(runners)
            .with_resource_pool(self.resource_pool.clone()))
    }

    /// Run a code fragment and block until its job terminates.
    pub fn interpret(&self, class_name: &str, script: &str, remote: &RemoteContext) -> Result<RemoteResult> {
        let slot = self.slot(class_name)?;
        let context = Arc::new(self.context(remote)?);

        self.clear_paragraph_resources(&remote.note_id, &remote.paragraph_id);

        let waiter = Arc::new(StatusWaiter::new());
        let job = {
            let slot = slot.clone();
            let context = context.clone();
            let script = script.to_string();
            Arc::new(Job::new(
                remote.paragraph_id.clone(),
                format!("{}:{}", class_name, remote.paragraph_id),
                Some(waiter.clone() as Arc<dyn JobListener>),
                move |_job: &Job| {
                    slot.ensure_open()?;
                    let result = slot.interpreter.interpret(&script, &context)?;
                    Ok(merge_output(result, &context))
                },
            ))
        };
        slot.scheduler.submit(job.clone())?;
        waiter.wait_until_terminated(&job, self.config.job_poll_interval);

        let result = match job.status() {
            JobStatus::Error => {
                InterpreterResult::error(job.error().unwrap_or_default())
            }
            JobStatus::Abort => InterpreterResult::error("Job aborted"),
            _ => job
                .result()
                .unwrap_or_else(|| InterpreterResult::with_type(Code::Success, ResultType::Text, "")),
        };

        if result.code() == Code::Success && result.result_type() == ResultType::Table {
            let name = well_known::resource_name(
                WellKnownResource::TableData,
                INSTANCE_RESULT,
                &remote.note_id,
                &remote.paragraph_id,
            );
            self.resource_pool
                .put_serializable(name, &TableData::from_result(&result)?)?;
        }

        let config_json = serde_json::to_string(&*context.config())?;
        let gui_json = serde_json::to_string(&*context.gui())?;
        Ok(RemoteResult {
            code: result.code(),
            result_type: result.result_type(),
            message: result.into_message(),
            config_json,
            gui_json,
        })
    }

    fn clear_paragraph_resources(&self, note_id: &str, paragraph_id: &str) {
        let pattern = well_known::resource_name_belongs_to(note_id, paragraph_id);
        for info in self.resource_pool.search_local(&pattern) {
            debug!(resource = %info.name, "removing previous paragraph resource");
            self.resource_pool.remove(&info.name);
        }
    }

    pub fn cancel(&self, class_name: &str, remote: &RemoteContext) -> Result<CancelOutcome> {
        let slot = self.slot(class_name)?;
        slot.interpreter.cancel(&self.context(remote)?)
    }

    pub fn progress(&self, class_name: &str, remote: &RemoteContext) -> Result<i32> {
        let slot = self.slot(class_name)?;
        slot.interpreter.progress(&self.context(remote)?)
    }

    pub fn form_type(&self, class_name: &str) -> Result<FormType> {
        self.slot(class_name)?.interpreter.form_type()
    }

    pub fn completion(&self, class_name: &str, buf: &str, cursor: usize) -> Result<Vec<String>> {
        let slot = self.slot(class_name)?;
        slot.ensure_open()?;
        slot.interpreter.completion(buf, cursor)
    }

    /// Status of a waiting or running job, `"Unknown"` otherwise.
    pub fn job_status(&self, job_id: &str) -> String {
        self.schedulers
            .all()
            .iter()
            .find_map(|scheduler| scheduler.find_job(job_id))
            .map(|job| job.status().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn next_event(&self) -> RemoteEvent {
        self.outbox.poll(self.config.event_poll_timeout)
    }

    /// Apply a variable created in the front-end. Never echoed back.
    pub fn angular_object_add(&self, data: &AngularObjectData) {
        let value = outbox::parse_angular_value(&data.value_json);
        let note_id = data.note_id.as_deref();
        let paragraph_id = data.paragraph_id.as_deref();
        if self
            .angular_registry
            .update(&data.name, note_id, paragraph_id, value.clone(), false)
            .is_none()
        {
            self.angular_registry
                .add(&data.name, value, note_id, paragraph_id, false);
        }
    }

    /// Apply a variable update from the front-end. Never echoed back.
    pub fn angular_object_update(
        &self,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
        value_json: Option<&str>,
    ) {
        let value = value_json.map(outbox::parse_angular_value).unwrap_or(Value::Null);
        if self
            .angular_registry
            .update(name, note_id, paragraph_id, value, false)
            .is_none()
        {
            error!(name, ?note_id, ?paragraph_id, "angular object does not exist");
        }
    }

    pub fn angular_object_remove(&self, name: &str, note_id: Option<&str>, paragraph_id: Option<&str>) {
        self.angular_registry.remove(name, note_id, paragraph_id, false);
    }

    pub fn resource_pool_search(&self, name_pattern: &str) -> Vec<ResourceInfo> {
        self.resource_pool.search_local(name_pattern)
    }

    /// Payload of a local serializable resource.
    pub fn resource_pool_get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.resource_pool.get_local(name) {
            Some(value) => value.to_bytes(),
            None => Ok(None),
        }
    }

    /// Close every interpreter and stop every scheduler.
    pub fn shutdown(&self) {
        let slots: Vec<Arc<InterpreterSlot>> = self.interpreters.lock().drain(..).collect();
        for slot in slots {
            if let Err(e) = slot.close() {
                warn!(interpreter = %slot.class_name, "failed to close interpreter: {}", e);
            }
        }
        self.schedulers.destroy();
        info!(group = %self.group_id, "interpreter runtime shut down");
    }

    /// Answer one request. `Shutdown` is handled by the server.
    pub fn handle(&self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("request failed: {}", e);
                Response::Error {
                    message: error_chain(&e),
                }
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Response> {
        Ok(match request {
            Request::CreateInterpreter {
                class_name,
                properties,
            } => {
                self.create_interpreter(&class_name, &properties)?;
                Response::Ok
            }
            Request::Open { class_name } => {
                self.open(&class_name)?;
                Response::Ok
            }
            Request::Close { class_name } => {
                self.close(&class_name)?;
                Response::Ok
            }
            Request::Interpret {
                class_name,
                script,
                context,
            } => Response::Result(self.interpret(&class_name, &script, &context)?),
            Request::Cancel {
                class_name,
                context,
            } => Response::Cancelled {
                supported: self.cancel(&class_name, &context)? == CancelOutcome::Cancelled,
            },
            Request::GetProgress {
                class_name,
                context,
            } => Response::Progress(self.progress(&class_name, &context)?),
            Request::GetFormType { class_name } => {
                Response::FormType(self.form_type(&class_name)?.to_string())
            }
            Request::Completion {
                class_name,
                buf,
                cursor,
            } => Response::Completion(self.completion(&class_name, &buf, cursor as usize)?),
            Request::GetStatus { job_id } => Response::Status(self.job_status(&job_id)),
            Request::GetEvent => Response::Event(self.next_event()),
            Request::AngularObjectAdd(data) => {
                self.angular_object_add(&data);
                Response::Ok
            }
            Request::AngularObjectUpdate {
                name,
                note_id,
                paragraph_id,
                value_json,
            } => {
                self.angular_object_update(
                    &name,
                    note_id.as_deref(),
                    paragraph_id.as_deref(),
                    value_json.as_deref(),
                );
                Response::Ok
            }
            Request::AngularObjectRemove {
                name,
                note_id,
                paragraph_id,
            } => {
                self.angular_object_remove(&name, note_id.as_deref(), paragraph_id.as_deref());
                Response::Ok
            }
            Request::ResourcePoolSearch { name_pattern } => {
                Response::ResourceInfos(self.resource_pool_search(&name_pattern))
            }
            Request::ResourcePoolGet { name } => {
                Response::ResourcePayload(self.resource_pool_get(&name)?)
            }
            Request::ResourcePoolInfo {
                request_id, infos, ..
            } => {
                self.pending.complete_search(request_id, infos);
                Response::Ok
            }
            Request::ResourcePoolObject {
                request_id,
                payload,
                ..
            } => {
                self.pending.complete_get(request_id, payload);
                Response::Ok
            }
            Request::GetResourcePoolId => Response::PoolId(self.resource_pool.id().to_string()),
            Request::Shutdown => {
                self.shutdown();
                Response::Ok
            }
        })
    }
}

/// Prepend buffered output to the interpreter's message.
fn merge_output(result: InterpreterResult, context: &InterpreterContext) -> InterpreterResult {
    let buffered = context.out().take();
    if buffered.is_empty() {
        return result;
    }
    let mut output = String::from_utf8_lossy(&buffered).into_owned();
    if !result.message().is_empty() || result.result_type() != ResultType::Text {
        output.push_str(&result.to_string());
    }
    InterpreterResult::new(result.code(), output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NAME_ANY;
    use std::io::Write;

    struct FailingInterpreter;

    impl Interpreter for FailingInterpreter {
        fn open(&self) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn interpret(&self, _script: &str, _context: &InterpreterContext) -> Result<InterpreterResult> {
            Err(Error::Interpreter("syntax error at line 1".to_string()))
        }
    }

    struct ChattyInterpreter;

    impl Interpreter for ChattyInterpreter {
        fn open(&self) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn interpret(&self, script: &str, context: &InterpreterContext) -> Result<InterpreterResult> {
            write!(&mut context.out(), "log line\n")?;
            context
                .config()
                .insert("seen".to_string(), Value::String(script.to_string()));
            Ok(InterpreterResult::success("value"))
        }
    }

    fn runtime() -> InterpreterRuntime {
        let mut factory = InterpreterFactory::with_builtins();
        factory.register("failing", |_| Ok(Box::new(FailingInterpreter) as Box<dyn Interpreter>));
        factory.register("chatty", |_| Ok(Box::new(ChattyInterpreter) as Box<dyn Interpreter>));
        let config = RuntimeConfig {
            event_poll_timeout: Duration::from_millis(20),
            resource_call_timeout: Duration::from_millis(50),
            job_poll_interval: Duration::from_millis(50),
        };
        InterpreterRuntime::new("group1", factory, config)
    }

    fn context(paragraph_id: &str) -> RemoteContext {
        RemoteContext {
            note_id: "note1".to_string(),
            paragraph_id: paragraph_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_interpreter_is_idempotent() {
        let runtime = runtime();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();
        assert_eq!(runtime.interpreter_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_unknown_interpreter() {
        let runtime = runtime();
        assert!(matches!(
            runtime.interpret("echo", "x", &context("p1")),
            Err(Error::InterpreterNotFound(_))
        ));
        assert!(matches!(
            runtime.create_interpreter("cobol", &Properties::new()),
            Err(Error::UnknownInterpreterClass(_))
        ));
    }

    #[test]
    fn test_interpret_echo() {
        let runtime = runtime();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();

        let result = runtime.interpret("echo", "hello", &context("p1")).unwrap();
        assert_eq!(result.code, Code::Success);
        assert_eq!(result.result_type, ResultType::Text);
        assert_eq!(result.message, "hello");
    }

    #[test]
    fn test_failure_becomes_error_result() {
        let runtime = runtime();
        runtime.create_interpreter("failing", &Properties::new()).unwrap();

        let result = runtime.interpret("failing", "x", &context("p1")).unwrap();
        assert_eq!(result.code, Code::Error);
        assert!(result.message.contains("syntax error at line 1"));
    }

    #[test]
    fn test_output_and_config_flow_back() {
        let runtime = runtime();
        runtime.create_interpreter("chatty", &Properties::new()).unwrap();

        let result = runtime.interpret("chatty", "abc", &context("p1")).unwrap();
        assert_eq!(result.message, "log line\nvalue");
        let config: Map<String, Value> = serde_json::from_str(&result.config_json).unwrap();
        assert_eq!(config.get("seen"), Some(&Value::from("abc")));
    }

    #[test]
    fn test_table_result_is_stored_and_replaced() {
        let runtime = runtime();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();
        let name = well_known::resource_name(WellKnownResource::TableData, INSTANCE_RESULT, "note1", "p1");

        let result = runtime
            .interpret("echo", "%table k\tv\na\t1", &context("p1"))
            .unwrap();
        assert_eq!(result.result_type, ResultType::Table);
        let table: TableData = runtime.resource_pool().get_as(&name).unwrap().unwrap();
        assert_eq!(table.data(0, 1), Some("1"));

        // Re-running the paragraph with a text result clears the old table.
        runtime.interpret("echo", "plain", &context("p1")).unwrap();
        assert!(runtime.resource_pool().get_local(&name).is_none());
    }

    #[test]
    fn test_rerun_leaves_other_paragraphs_alone() {
        let runtime = runtime();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();

        runtime.interpret("echo", "%table a\n1", &context("p1")).unwrap();
        runtime.interpret("echo", "%table b\n2", &context("p2")).unwrap();
        runtime.interpret("echo", "%table c\n3", &context("p1")).unwrap();

        assert_eq!(runtime.resource_pool_search(NAME_ANY).len(), 2);
    }

    #[test]
    fn test_cancel_not_supported_by_default() {
        let runtime = runtime();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();
        match runtime.handle(Request::Cancel {
            class_name: "echo".to_string(),
            context: context("p1"),
        }) {
            Response::Cancelled { supported } => assert!(!supported),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_unknown_job_status() {
        let runtime = runtime();
        assert_eq!(runtime.job_status("nope"), "Unknown");
    }

    #[test]
    fn test_front_end_angular_updates_are_not_echoed() {
        let runtime = runtime();
        runtime.angular_object_add(&AngularObjectData {
            name: "x".to_string(),
            note_id: Some("note1".to_string()),
            paragraph_id: None,
            value_json: "1".to_string(),
        });
        runtime.angular_object_update("x", Some("note1"), None, Some("2"));

        assert_eq!(
            runtime.angular_registry().get("x", Some("note1"), None).unwrap().value,
            Value::from(2)
        );
        assert_eq!(runtime.next_event(), RemoteEvent::NoOp);
    }

    #[test]
    fn test_interpreter_angular_changes_become_events() {
        let runtime = runtime();
        runtime
            .angular_registry()
            .add("y", Value::from("v"), Some("note1"), None, true);

        match runtime.next_event() {
            RemoteEvent::AngularObjectAdd(data) => {
                assert_eq!(data.name, "y");
                assert_eq!(data.value_json, "\"v\"");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_local_resource_payloads() {
        let runtime = runtime();
        runtime.resource_pool().put("shared", "value");
        runtime
            .resource_pool()
            .put("private", crate::resource::ResourceValue::local(1u8));

        let bytes = runtime.resource_pool_get("shared").unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), Value::from("value"));
        assert_eq!(runtime.resource_pool_get("private").unwrap(), None);
        assert_eq!(runtime.resource_pool_get("missing").unwrap(), None);
    }

    #[test]
    fn test_shutdown_closes_interpreters() {
        let runtime = runtime();
        runtime.create_interpreter("echo", &Properties::new()).unwrap();
        runtime.interpret("echo", "x", &context("p1")).unwrap();

        runtime.shutdown();
        assert!(runtime.interpreter_names().is_empty());
    }

    #[test]
    fn test_each_interpreter_gets_its_own_scheduler() {
        let runtime = runtime();
        let props = Properties::from([("parallelism".to_string(), "3".to_string())]);
        runtime.create_interpreter("echo", &props).unwrap();
        runtime.create_interpreter("pool", &Properties::new()).unwrap();

        let echo = runtime.schedulers().get("echo").unwrap();
        let pool = runtime.schedulers().get("pool").unwrap();
        assert!(!Arc::ptr_eq(&echo, &pool));
        assert_eq!(runtime.schedulers().all().len(), 2);

        runtime.shutdown();
        assert!(echo.is_stopped());
        assert!(pool.is_stopped());
        assert!(runtime.schedulers().all().is_empty());

        // A new interpreter after shutdown gets a fresh scheduler.
        runtime.create_interpreter("echo", &Properties::new()).unwrap();
        let again = runtime.schedulers().get("echo").unwrap();
        assert!(!again.is_stopped());
        runtime.shutdown();
    }
}

//! Units of work run by a [`Scheduler`](super::Scheduler).

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Result;
use crate::interpreter::InterpreterResult;

/// Lifecycle of a job. `Finished`, `Error` and `Abort` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Ready,
    Running,
    Finished,
    Error,
    Abort,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error | JobStatus::Abort)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "READY",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Error => "ERROR",
            JobStatus::Abort => "ABORT",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of a job's progress and status transitions.
pub trait JobListener: Send + Sync {
    fn on_progress_update(&self, _job: &Job, _progress: i32) {}

    fn before_status_change(&self, _job: &Job, _before: JobStatus, _after: JobStatus) {}

    fn after_status_change(&self, job: &Job, before: JobStatus, after: JobStatus);
}

type JobTask = Box<dyn FnOnce(&Job) -> Result<InterpreterResult> + Send>;

struct JobState {
    status: JobStatus,
    result: Option<InterpreterResult>,
    /// Error chain or panic message of a failed job.
    error: Option<String>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

/// A unit of work with an observable status.
pub struct Job {
    id: String,
    name: String,
    state: Mutex<JobState>,
    task: Mutex<Option<JobTask>>,
    listener: Option<Arc<dyn JobListener>>,
    progress: AtomicI32,
    aborted: AtomicBool,
    created: Instant,
}

impl Job {
    pub fn new<F>(
        id: impl Into<String>,
        name: impl Into<String>,
        listener: Option<Arc<dyn JobListener>>,
        task: F,
    ) -> Self
    where
        F: FnOnce(&Job) -> Result<InterpreterResult> + Send + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            state: Mutex::new(JobState {
                status: JobStatus::Ready,
                result: None,
                error: None,
                started: None,
                finished: None,
            }),
            task: Mutex::new(Some(Box::new(task))),
            listener,
            progress: AtomicI32::new(0),
            aborted: AtomicBool::new(false),
            created: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn is_terminated(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn result(&self) -> Option<InterpreterResult> {
        self.state.lock().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn progress(&self) -> i32 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, progress: i32) {
        self.progress.store(progress, Ordering::Relaxed);
        if let Some(listener) = &self.listener {
            listener.on_progress_update(self, progress);
        }
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Time spent running, once the job has finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let state = self.state.lock();
        Some(state.finished?.duration_since(state.started?))
    }

    /// Request abort. A job that has not started yet is aborted immediately.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        if self.status() == JobStatus::Ready {
            self.set_status(JobStatus::Abort);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Move to `after` unless the job already reached a terminal status.
    pub(crate) fn set_status(&self, after: JobStatus) {
        let before = self.status();
        if before.is_terminal() || before == after {
            return;
        }
        if let Some(listener) = &self.listener {
            listener.before_status_change(self, before, after);
        }
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = after;
            match after {
                JobStatus::Running => state.started = Some(Instant::now()),
                s if s.is_terminal() => state.finished = Some(Instant::now()),
                _ => {}
            }
        }
        debug!(job = %self.id, %before, %after, "job status changed");
        if let Some(listener) = &self.listener {
            listener.after_status_change(self, before, after);
        }
    }

    /// Execute the task on the calling thread. Runs at most once.
    pub(crate) fn run(&self) {
        if self.is_terminated() {
            return;
        }
        if self.is_aborted() {
            self.set_status(JobStatus::Abort);
            return;
        }
        let Some(task) = self.task.lock().take() else {
            return;
        };

        self.set_status(JobStatus::Running);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(self)));

        let status = match outcome {
            Ok(Ok(result)) => {
                self.state.lock().result = Some(result);
                if self.is_aborted() {
                    JobStatus::Abort
                } else {
                    JobStatus::Finished
                }
            }
            Ok(Err(e)) => {
                self.state.lock().error = Some(error_chain(&e));
                JobStatus::Error
            }
            Err(payload) => {
                self.state.lock().error = Some(panic_message(payload.as_ref()));
                JobStatus::Error
            }
        };
        self.set_status(status);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Format an error with every cause on its own line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: unknown payload".to_string()
    }
}

/// Listener that lets a thread block until a job terminates.
///
/// Waiting re-checks the job status at a bounded interval, so a missed
/// notification only delays the waiter.
#[derive(Default)]
pub struct StatusWaiter {
    lock: Mutex<()>,
    changed: Condvar,
}

impl StatusWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `job` is terminal, re-checking at least every `recheck`.
    pub fn wait_until_terminated(&self, job: &Job, recheck: Duration) {
        let mut guard = self.lock.lock();
        while !job.is_terminated() {
            self.changed.wait_for(&mut guard, recheck);
        }
    }
}

impl JobListener for StatusWaiter {
    fn after_status_change(&self, _job: &Job, _before: JobStatus, after: JobStatus) {
        if after.is_terminal() {
            let _guard = self.lock.lock();
            self.changed.notify_all();
        }
    }
}

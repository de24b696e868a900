//! Job schedulers.
//!
//! A [`Scheduler`] owns a fixed set of worker threads. With one worker it runs
//! jobs strictly in submission order and never overlaps them; with `n` workers
//! at most `n` jobs run at once, started in submission order.

pub mod job;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub use job::{Job, JobListener, JobStatus, StatusWaiter, error_chain};

#[derive(Default)]
struct Queue {
    waiting: VecDeque<Arc<Job>>,
    running: Vec<Arc<Job>>,
    stopped: bool,
}

struct Shared {
    name: String,
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Runs submitted jobs on dedicated worker threads.
pub struct Scheduler {
    shared: Arc<Shared>,
    max_concurrency: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// One job at a time, in order.
    pub fn fifo(name: impl Into<String>) -> Result<Self> {
        Self::with_concurrency(name, 1)
    }

    /// Up to `max_concurrency` jobs at once.
    pub fn parallel(name: impl Into<String>, max_concurrency: usize) -> Result<Self> {
        Self::with_concurrency(name, max_concurrency.max(1))
    }

    fn with_concurrency(name: impl Into<String>, max_concurrency: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.into(),
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(max_concurrency);
        for i in 0..max_concurrency {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", shared.name, i))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| Error::Scheduler(format!("failed to spawn worker: {}", e)))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            max_concurrency,
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Queue a job. Fails once the scheduler has been stopped.
    pub fn submit(&self, job: Arc<Job>) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            return Err(Error::Scheduler(format!(
                "scheduler {} is stopped",
                self.shared.name
            )));
        }
        debug!(scheduler = %self.shared.name, job = %job.id(), "job submitted");
        queue.waiting.push_back(job);
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn jobs_waiting(&self) -> Vec<Arc<Job>> {
        self.shared.queue.lock().waiting.iter().cloned().collect()
    }

    pub fn jobs_running(&self) -> Vec<Arc<Job>> {
        self.shared.queue.lock().running.clone()
    }

    /// Waiting or running job with this id.
    pub fn find_job(&self, job_id: &str) -> Option<Arc<Job>> {
        let queue = self.shared.queue.lock();
        queue
            .running
            .iter()
            .chain(queue.waiting.iter())
            .find(|job| job.id() == job_id)
            .cloned()
    }

    /// Stop accepting jobs, abort the ones not started yet and wait for
    /// running ones to finish.
    pub fn stop(&self) {
        let waiting: Vec<Arc<Job>> = {
            let mut queue = self.shared.queue.lock();
            if queue.stopped {
                return;
            }
            queue.stopped = true;
            self.shared.available.notify_all();
            queue.waiting.drain(..).collect()
        };
        for job in waiting {
            job.abort();
        }

        let current = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(scheduler = %self.shared.name, "worker thread panicked");
            }
        }
        info!(scheduler = %self.shared.name, "scheduler stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.queue.lock().stopped
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.stopped {
                    return;
                }
                if let Some(job) = queue.waiting.pop_front() {
                    queue.running.push(job.clone());
                    break job;
                }
                shared.available.wait(&mut queue);
            }
        };

        job.run();

        shared
            .queue
            .lock()
            .running
            .retain(|running| !Arc::ptr_eq(running, &job));
    }
}

/// Named schedulers, created on first use.
#[derive(Default)]
pub struct SchedulerRegistry {
    schedulers: Mutex<HashMap<String, Arc<Scheduler>>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_or_get_fifo(&self, name: &str) -> Result<Arc<Scheduler>> {
        self.create_or_get(name, || Scheduler::fifo(name))
    }

    pub fn create_or_get_parallel(&self, name: &str, max_concurrency: usize) -> Result<Arc<Scheduler>> {
        self.create_or_get(name, || Scheduler::parallel(name, max_concurrency))
    }

    fn create_or_get(
        &self,
        name: &str,
        create: impl FnOnce() -> Result<Scheduler>,
    ) -> Result<Arc<Scheduler>> {
        let mut schedulers = self.schedulers.lock();
        if let Some(existing) = schedulers.get(name) {
            return Ok(existing.clone());
        }
        let scheduler = Arc::new(create()?);
        schedulers.insert(name.to_string(), scheduler.clone());
        Ok(scheduler)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Scheduler>> {
        self.schedulers.lock().get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Scheduler>> {
        self.schedulers.lock().values().cloned().collect()
    }

    /// Remove and stop a scheduler.
    pub fn remove(&self, name: &str) -> Option<Arc<Scheduler>> {
        let removed = self.schedulers.lock().remove(name);
        if let Some(scheduler) = &removed {
            scheduler.stop();
        }
        removed
    }

    /// Stop every scheduler.
    pub fn destroy(&self) {
        let schedulers: Vec<Arc<Scheduler>> = self.schedulers.lock().drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::InterpreterResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tracking_job(
        id: usize,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<usize>>>,
    ) -> Arc<Job> {
        Arc::new(Job::new(id.to_string(), "tracked", None, move |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            order.lock().push(id);
            thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(InterpreterResult::success(id.to_string()))
        }))
    }

    fn wait_all(jobs: &[Arc<Job>]) {
        let waiter = StatusWaiter::new();
        for job in jobs {
            waiter.wait_until_terminated(job, Duration::from_millis(5));
        }
    }

    #[test]
    fn test_fifo_runs_in_order_without_overlap() {
        let scheduler = Scheduler::fifo("fifo-test").unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let jobs: Vec<Arc<Job>> = (0..8)
            .map(|i| tracking_job(i, active.clone(), peak.clone(), order.clone()))
            .collect();
        for job in &jobs {
            scheduler.submit(job.clone()).unwrap();
        }
        wait_all(&jobs);

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
        assert!(jobs.iter().all(|job| job.status() == JobStatus::Finished));
    }

    #[test]
    fn test_parallel_respects_bound() {
        let scheduler = Scheduler::parallel("parallel-test", 3).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let jobs: Vec<Arc<Job>> = (0..12)
            .map(|i| tracking_job(i, active.clone(), peak.clone(), order.clone()))
            .collect();
        for job in &jobs {
            scheduler.submit(job.clone()).unwrap();
        }
        wait_all(&jobs);

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(order.lock().len(), 12);
    }

    #[test]
    fn test_stop_aborts_waiting_jobs() {
        let scheduler = Scheduler::fifo("stop-test").unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let blocker = Arc::new(Job::new("blocker", "blocker", None, move |_| {
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            Ok(InterpreterResult::success(""))
        }));
        let queued = Arc::new(Job::new("queued", "queued", None, |_| {
            Ok(InterpreterResult::success(""))
        }));
        scheduler.submit(blocker.clone()).unwrap();
        scheduler.submit(queued.clone()).unwrap();

        while blocker.status() != JobStatus::Running {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.jobs_running().len(), 1);
        assert!(scheduler.find_job("queued").is_some());

        let stopper = thread::spawn({
            let queued = queued.clone();
            move || {
                while queued.status() != JobStatus::Abort {
                    thread::sleep(Duration::from_millis(1));
                }
                release_tx.send(()).unwrap();
            }
        });
        scheduler.stop();
        stopper.join().unwrap();

        assert_eq!(queued.status(), JobStatus::Abort);
        assert_eq!(blocker.status(), JobStatus::Finished);
        assert!(scheduler.submit(queued).is_err());
    }

    #[test]
    fn test_registry_reuses_by_name() {
        let registry = SchedulerRegistry::new();
        let a = registry.create_or_get_fifo("interp").unwrap();
        let b = registry.create_or_get_fifo("interp").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let removed = registry.remove("interp").unwrap();
        assert!(removed.is_stopped());
        assert!(registry.get("interp").is_none());
    }
}

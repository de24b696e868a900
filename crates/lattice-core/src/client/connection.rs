//! Reference-counted access to one interpreter process.
//!
//! Every front-end interpreter of a group shares one [`ConnectionPool`]. The
//! first `reference` brings the process up together with the client pool and
//! the event poller; the last `dereference` shuts all of them down again.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::poller::{EventPoller, PollerConfig, PollerState};
use super::pool::{ClientPool, ClientPoolConfig, PooledClient};
use super::runner::ContextRunnerPool;
use crate::angular::AngularObjectRegistry;
use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::process::InterpreterProcess;
use crate::resource::{ResourceInfo, location_matches, matches};

#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    pub client: ClientPoolConfig,
    pub poller: PollerConfig,
    /// How long the last `dereference` waits for the process to exit on its
    /// own after the shutdown call, before stopping it.
    pub graceful_shutdown_timeout: Duration,
    pub shutdown_poll_interval: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            client: ClientPoolConfig::default(),
            poller: PollerConfig::default(),
            graceful_shutdown_timeout: Duration::from_secs(30),
            shutdown_poll_interval: Duration::from_millis(500),
        }
    }
}

struct Lifecycle {
    reference_count: usize,
    poller: Option<EventPoller>,
}

pub struct ConnectionPool {
    group_id: String,
    process: Arc<dyn InterpreterProcess>,
    config: ConnectionPoolConfig,
    /// Guards every reference count transition.
    lifecycle: Mutex<Lifecycle>,
    clients: Mutex<Option<Arc<ClientPool>>>,
    angular_registry: Arc<AngularObjectRegistry>,
    runner_pool: ContextRunnerPool,
    resource_pool_id: Mutex<Option<String>>,
    cluster: Weak<Cluster>,
    self_ref: Weak<ConnectionPool>,
}

impl ConnectionPool {
    pub fn new(
        group_id: impl Into<String>,
        process: Arc<dyn InterpreterProcess>,
        angular_registry: Arc<AngularObjectRegistry>,
        config: ConnectionPoolConfig,
        cluster: Weak<Cluster>,
    ) -> Arc<Self> {
        let group_id = group_id.into();
        Arc::new_cyclic(|self_ref| Self {
            group_id,
            process,
            config,
            lifecycle: Mutex::new(Lifecycle {
                reference_count: 0,
                poller: None,
            }),
            clients: Mutex::new(None),
            angular_registry,
            runner_pool: ContextRunnerPool::new(),
            resource_pool_id: Mutex::new(None),
            cluster,
            self_ref: self_ref.clone(),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn process(&self) -> &Arc<dyn InterpreterProcess> {
        &self.process
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    pub fn angular_registry(&self) -> &Arc<AngularObjectRegistry> {
        &self.angular_registry
    }

    pub fn runner_pool(&self) -> &ContextRunnerPool {
        &self.runner_pool
    }

    pub fn cluster(&self) -> Option<Arc<Cluster>> {
        self.cluster.upgrade()
    }

    pub fn reference_count(&self) -> usize {
        self.lifecycle.lock().reference_count
    }

    /// State of the event poller, if one is running.
    pub fn poller_state(&self) -> Option<PollerState> {
        self.lifecycle.lock().poller.as_ref().map(EventPoller::state)
    }

    /// Take a reference, starting the process on the first one.
    ///
    /// Returns the new count. Fails without counting when the process does
    /// not come up.
    pub fn reference(&self) -> Result<usize> {
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.reference_count == 0 {
            self.bring_up(&mut lifecycle, EventPoller::start)?;
        }

        lifecycle.reference_count += 1;
        debug!(group = %self.group_id, count = lifecycle.reference_count, "referenced");
        Ok(lifecycle.reference_count)
    }

    /// Start the process, the client pool and the event poller.
    ///
    /// A failure after the process came up closes the client pool and stops
    /// an owned process again, so nothing outlives a failed first reference.
    fn bring_up(
        &self,
        lifecycle: &mut Lifecycle,
        start_poller: impl FnOnce(Weak<ConnectionPool>, PollerConfig) -> Result<EventPoller>,
    ) -> Result<()> {
        if !self.process.is_running() {
            info!(group = %self.group_id, "starting interpreter process");
            self.process.start();
        }
        if !self.process.is_running() {
            error!(group = %self.group_id, "interpreter process failed to start");
            return Err(Error::ProcessNotRunning);
        }

        self.ensure_clients();

        if lifecycle.poller.is_none() {
            match start_poller(self.self_ref.clone(), self.config.poller.clone()) {
                Ok(poller) => lifecycle.poller = Some(poller),
                Err(e) => {
                    error!(group = %self.group_id, "failed to start event poller: {}", e);
                    if let Some(clients) = self.clients.lock().take() {
                        clients.close();
                    }
                    if self.process.owns_process() {
                        self.process.stop();
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Client pool for the current process, created on first use.
    pub(super) fn ensure_clients(&self) -> Arc<ClientPool> {
        self.clients
            .lock()
            .get_or_insert_with(|| {
                Arc::new(ClientPool::new(
                    self.process.host(),
                    self.process.port(),
                    self.config.client.clone(),
                ))
            })
            .clone()
    }

    /// Release a reference, shutting the process down on the last one.
    ///
    /// Returns the new count. Releasing at zero does nothing.
    pub fn dereference(&self) -> usize {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.reference_count == 0 {
            return 0;
        }
        lifecycle.reference_count -= 1;
        debug!(group = %self.group_id, count = lifecycle.reference_count, "dereferenced");
        if lifecycle.reference_count > 0 {
            return lifecycle.reference_count;
        }

        info!(group = %self.group_id, "shutting down interpreter process");
        if let Some(poller) = lifecycle.poller.take() {
            poller.shutdown();
        }

        match self.get_client() {
            Ok(mut client) => {
                // A wedged process must not hold the lifecycle lock forever.
                let bound = Some(self.config.graceful_shutdown_timeout);
                if let Err(e) = client.set_call_timeout(bound) {
                    warn!(group = %self.group_id, "cannot bound shutdown call: {}", e);
                }
                if let Err(e) = client.shutdown() {
                    warn!(group = %self.group_id, "shutdown call failed: {}", e);
                }
            }
            Err(e) => warn!(group = %self.group_id, "cannot reach process for shutdown: {}", e),
        }

        if let Some(clients) = self.clients.lock().take() {
            clients.close();
        }

        if self.process.owns_process() {
            let deadline = Instant::now() + self.config.graceful_shutdown_timeout;
            while self.process.is_running() && Instant::now() < deadline {
                thread::sleep(self.config.shutdown_poll_interval);
            }
        }
        if self.process.is_running() {
            info!(group = %self.group_id, "stopping interpreter process");
            self.process.stop();
        }

        *self.resource_pool_id.lock() = None;
        info!(group = %self.group_id, "interpreter process terminated");
        0
    }

    /// Borrow a client. Fails when the process is not running.
    pub fn get_client(&self) -> Result<PooledClient> {
        let clients = self.clients.lock().clone().ok_or(Error::ProcessNotRunning)?;
        if !self.process.is_running() {
            return Err(Error::ProcessNotRunning);
        }
        clients.checkout()
    }

    pub fn num_active_clients(&self) -> usize {
        self.clients.lock().as_ref().map_or(0, |c| c.num_active())
    }

    pub fn num_idle_clients(&self) -> usize {
        self.clients.lock().as_ref().map_or(0, |c| c.num_idle())
    }

    /// Id of the process's resource pool, fetched once per process start.
    pub fn resource_pool_id(&self) -> Result<String> {
        if let Some(id) = self.resource_pool_id.lock().clone() {
            return Ok(id);
        }
        let id = self.get_client()?.resource_pool_id()?;
        *self.resource_pool_id.lock() = Some(id.clone());
        Ok(id)
    }

    /// Matching resources of this process's pool.
    pub fn search_resources(&self, location: &str, name_pattern: &str) -> Result<Vec<ResourceInfo>> {
        if !self.is_running() {
            return Ok(Vec::new());
        }
        if !location_matches(location, &self.resource_pool_id()?) {
            return Ok(Vec::new());
        }
        let infos = self.get_client()?.resource_pool_search(name_pattern)?;
        Ok(infos
            .into_iter()
            .filter(|info| matches(location, name_pattern, info))
            .collect())
    }

    /// Payload of a resource in this process's pool.
    pub fn get_resource(&self, location: &str, name: &str) -> Result<Option<Vec<u8>>> {
        if !self.is_running() {
            return Ok(None);
        }
        if !location_matches(location, &self.resource_pool_id()?) {
            return Ok(None);
        }
        self.get_client()?.resource_pool_get(name)
    }

    /// Push a value changed in the front-end to the process.
    ///
    /// The local registry is updated silently; the process applies the value
    /// without raising an event, so nothing comes back.
    pub fn update_remote_angular_object(
        &self,
        name: &str,
        note_id: Option<&str>,
        paragraph_id: Option<&str>,
        value: Value,
    ) -> Result<()> {
        if self
            .angular_registry
            .update(name, note_id, paragraph_id, value.clone(), false)
            .is_none()
        {
            self.angular_registry
                .add(name, value.clone(), note_id, paragraph_id, false);
        }

        let value_json = serde_json::to_string(&value)?;
        let mut client = self.get_client()?;
        client.angular_object_update(name, note_id, paragraph_id, Some(value_json))
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("group_id", &self.group_id)
            .field("running", &self.is_running())
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Process stand-in that counts lifecycle calls.
    struct CountingProcess {
        port: u16,
        launchable: bool,
        running: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CountingProcess {
        fn new(launchable: bool) -> Arc<Self> {
            // Nothing listens here, so every call fails fast.
            Self::on_port(crate::process::net::find_available_port().unwrap(), launchable)
        }

        fn on_port(port: u16, launchable: bool) -> Arc<Self> {
            Arc::new(Self {
                port,
                launchable,
                running: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl InterpreterProcess for CountingProcess {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running.store(self.launchable, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }

        fn host(&self) -> String {
            "127.0.0.1".to_string()
        }

        fn port(&self) -> u16 {
            self.port
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    fn config() -> ConnectionPoolConfig {
        ConnectionPoolConfig {
            client: ClientPoolConfig {
                max_total: 2,
                borrow_timeout: Duration::from_millis(50),
                connect_timeout: Duration::from_millis(100),
                call_timeout: Some(Duration::from_millis(500)),
            },
            poller: PollerConfig {
                idle_wait: Duration::from_millis(10),
                error_backoff: Duration::from_millis(10),
            },
            graceful_shutdown_timeout: Duration::from_millis(20),
            shutdown_poll_interval: Duration::from_millis(5),
        }
    }

    fn connection_pool(process: Arc<CountingProcess>) -> Arc<ConnectionPool> {
        ConnectionPool::new(
            "group",
            process,
            Arc::new(AngularObjectRegistry::new("group", None)),
            config(),
            Weak::new(),
        )
    }

    #[test]
    fn test_dereference_at_zero_is_noop() {
        let process = CountingProcess::new(true);
        let pool = connection_pool(process.clone());

        assert_eq!(pool.dereference(), 0);
        assert_eq!(process.starts.load(Ordering::SeqCst), 0);
        assert_eq!(process.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_reference_starts_last_dereference_stops() {
        let process = CountingProcess::new(true);
        let pool = connection_pool(process.clone());

        assert_eq!(pool.reference().unwrap(), 1);
        assert_eq!(pool.reference().unwrap(), 2);
        assert!(pool.poller_state().is_some());
        assert_eq!(process.starts.load(Ordering::SeqCst), 1);

        assert_eq!(pool.dereference(), 1);
        assert_eq!(process.stops.load(Ordering::SeqCst), 0);
        assert_eq!(pool.dereference(), 0);
        assert_eq!(process.stops.load(Ordering::SeqCst), 1);
        assert!(pool.poller_state().is_none());
        assert!(matches!(pool.get_client(), Err(Error::ProcessNotRunning)));
    }

    #[test]
    fn test_concurrent_references_start_and_stop_once() {
        let process = CountingProcess::new(true);
        let pool = connection_pool(process.clone());
        let threads = 16;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || pool.reference().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.reference_count(), threads);

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || pool.dereference())
            })
            .collect();
        let mut finals: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        finals.sort();

        assert_eq!(finals, (0..threads).collect::<Vec<_>>());
        assert_eq!(process.starts.load(Ordering::SeqCst), 1);
        assert_eq!(process.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_start_builds_no_client_pool() {
        let process = CountingProcess::new(false);
        let pool = connection_pool(process.clone());

        assert!(matches!(pool.reference(), Err(Error::ProcessNotRunning)));
        assert_eq!(pool.reference_count(), 0);
        assert!(pool.poller_state().is_none());
        assert!(matches!(pool.get_client(), Err(Error::ProcessNotRunning)));
        assert_eq!(pool.num_idle_clients(), 0);
    }

    #[test]
    fn test_restart_after_full_release() {
        let process = CountingProcess::new(true);
        let pool = connection_pool(process.clone());

        pool.reference().unwrap();
        pool.dereference();
        pool.reference().unwrap();
        pool.dereference();

        assert_eq!(process.starts.load(Ordering::SeqCst), 2);
        assert_eq!(process.stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_poller_start_undoes_bring_up() {
        let process = CountingProcess::new(true);
        let pool = connection_pool(process.clone());

        {
            let mut lifecycle = pool.lifecycle.lock();
            let result = pool.bring_up(&mut lifecycle, |_, _| {
                Err(Error::Io(std::io::Error::other("no threads left")))
            });
            assert!(matches!(result, Err(Error::Io(_))));
            assert!(lifecycle.poller.is_none());
        }

        assert_eq!(pool.reference_count(), 0);
        assert_eq!(process.starts.load(Ordering::SeqCst), 1);
        assert_eq!(process.stops.load(Ordering::SeqCst), 1);
        assert!(!pool.is_running());
        assert!(matches!(pool.get_client(), Err(Error::ProcessNotRunning)));

        // The pool is usable again afterwards.
        assert_eq!(pool.reference().unwrap(), 1);
        assert_eq!(process.starts.load(Ordering::SeqCst), 2);
        assert_eq!(pool.dereference(), 0);
        assert_eq!(process.stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_last_dereference_is_bounded_when_process_is_wedged() {
        // Accepts connections through its backlog but never answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let process = CountingProcess::on_port(silent.local_addr().unwrap().port(), true);
        let pool = connection_pool(process.clone());

        pool.reference().unwrap();
        let start = Instant::now();
        assert_eq!(pool.dereference(), 0);

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(process.stops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.reference_count(), 0);
        assert!(pool.poller_state().is_none());
    }
}

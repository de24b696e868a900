//! Interpreter processes launched as children of this process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::{InterpreterProcess, net};
use crate::error::{Error, Result};

const WORKER_BINARY: &str = if cfg!(windows) {
    "lattice-worker.exe"
} else {
    "lattice-worker"
};

/// How often the exit watcher polls the child.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often `start` probes the child's port.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How to launch an interpreter process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the port flag.
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    /// Merged over the inherited environment.
    pub env: HashMap<String, String>,
    /// Flag that precedes the port number on the command line.
    pub port_flag: String,
    /// How long the child has to start listening.
    pub connect_timeout: Duration,
    /// How long `stop` waits after asking the child to exit.
    pub termination_timeout: Duration,
}

impl LaunchConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
            env: HashMap::new(),
            port_flag: "--port".to_string(),
            connect_timeout: Duration::from_secs(30),
            termination_timeout: Duration::from_secs(30),
        }
    }

    /// Launch the `lattice-worker` binary.
    pub fn worker() -> Result<Self> {
        Ok(Self::new(find_worker_binary()?))
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }
}

/// Find the lattice-worker binary path.
///
/// Looks in order at `LATTICE_WORKER_PATH`, the directory of the current
/// executable (and its parent, for test binaries under `deps/`), `PATH`, and
/// the workspace `target/` directories.
pub fn find_worker_binary() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("LATTICE_WORKER_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        for dir in exe_path.ancestors().skip(1).take(2) {
            let worker_path = dir.join(WORKER_BINARY);
            if worker_path.exists() {
                return Ok(worker_path);
            }
        }
    }

    if let Ok(path) = which::which(WORKER_BINARY) {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in ["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(WORKER_BINARY);
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(Error::Transport(
        "Could not find lattice-worker binary. Set LATTICE_WORKER_PATH or ensure it's in PATH."
            .to_string(),
    ))
}

/// Running flag of the child plus a condition signalled when it exits.
///
/// Every launch bumps `generation`; an exit watcher only reports the exit of
/// the child it was started for.
#[derive(Default)]
struct ExitState {
    running: AtomicBool,
    generation: AtomicU64,
    lock: Mutex<()>,
    exited: Condvar,
}

impl ExitState {
    /// Record a new launch and return its generation.
    fn begin(&self) -> u64 {
        let _guard = self.lock.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(true, Ordering::SeqCst);
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Mark the child of `generation` as gone. Returns false, changing
    /// nothing, when a newer child has been launched since.
    fn mark_exited_for(&self, generation: u64) -> bool {
        let _guard = self.lock.lock();
        if !self.is_current(generation) {
            return false;
        }
        self.running.store(false, Ordering::SeqCst);
        self.exited.notify_all();
        true
    }

    fn mark_exited(&self) {
        let _guard = self.lock.lock();
        self.running.store(false, Ordering::SeqCst);
        self.exited.notify_all();
    }

    /// Wait until the child has exited; false on timeout.
    fn wait_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while self.running.load(Ordering::SeqCst) {
            if self.exited.wait_until(&mut guard, deadline).timed_out() {
                return !self.running.load(Ordering::SeqCst);
            }
        }
        true
    }
}

/// An interpreter process started and owned by this process.
pub struct LocalInterpreterProcess {
    config: LaunchConfig,
    port: AtomicU16,
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<ExitState>,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
}

impl LocalInterpreterProcess {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            port: AtomicU16::new(0),
            child: Arc::new(Mutex::new(None)),
            state: Arc::new(ExitState::default()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Process id of the child, while it is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(Child::id)
    }

    fn spawn_child(&self, port: u16) -> std::io::Result<Child> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(&self.config.port_flag)
            .arg(port.to_string())
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.config.work_dir {
            command.current_dir(dir);
        }
        command.spawn()
    }

    fn watch_exit(&self, generation: u64) {
        let child = self.child.clone();
        let state = self.state.clone();
        let spawned = thread::Builder::new()
            .name("interpreter-exit-watcher".to_string())
            .spawn(move || {
                loop {
                    {
                        let mut guard = child.lock();
                        if !state.is_current(generation) {
                            debug!(generation, "exit watcher outlived its child");
                            return;
                        }
                        let Some(process) = guard.as_mut() else {
                            break;
                        };
                        match process.try_wait() {
                            Ok(Some(status)) => {
                                info!(pid = process.id(), %status, "interpreter process exited");
                                *guard = None;
                                break;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("failed to poll interpreter process: {}", e);
                                break;
                            }
                        }
                    }
                    thread::sleep(EXIT_POLL_INTERVAL);
                }
                state.mark_exited_for(generation);
            });
        if let Err(e) = spawned {
            error!("failed to spawn exit watcher: {}", e);
        }
    }

    #[cfg(unix)]
    fn request_termination(&self) {
        if let Some(pid) = self.pid() {
            // SAFETY: kill(2) with a pid we spawned and have not reaped yet.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn request_termination(&self) {
        self.force_kill();
    }

    fn force_kill(&self) {
        let mut guard = self.child.lock();
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), "failed to kill interpreter process: {}", e);
            }
            let _ = child.wait();
        }
        drop(guard);
        self.state.mark_exited();
    }
}

impl InterpreterProcess for LocalInterpreterProcess {
    fn start(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.is_running() {
            return;
        }

        let port = match net::find_available_port() {
            Ok(port) => port,
            Err(e) => {
                error!("no free port for interpreter process: {}", e);
                return;
            }
        };

        let child = match self.spawn_child(port) {
            Ok(child) => child,
            Err(e) => {
                error!(program = %self.config.program.display(), "failed to launch interpreter process: {}", e);
                return;
            }
        };
        info!(pid = child.id(), port, program = %self.config.program.display(), "launched interpreter process");

        self.port.store(port, Ordering::SeqCst);
        let generation = self.state.begin();
        *self.child.lock() = Some(child);
        self.watch_exit(generation);

        let state = self.state.clone();
        let reachable = net::wait_for_endpoint(
            "127.0.0.1",
            port,
            self.config.connect_timeout,
            CONNECT_POLL_INTERVAL.min(self.config.connect_timeout),
            || state.running.load(Ordering::SeqCst),
        );
        if !reachable {
            warn!(port, timeout = ?self.config.connect_timeout, "interpreter process did not start listening");
            self.force_kill();
        }
    }

    fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.child.lock().is_none() {
            self.state.mark_exited();
            return;
        }

        info!(port = self.port(), "stopping interpreter process");
        self.request_termination();
        if !self.state.wait_exit(self.config.termination_timeout) {
            warn!("interpreter process ignored termination request, killing it");
            self.force_kill();
        }
    }

    fn host(&self) -> String {
        "127.0.0.1".to_string()
    }

    fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

impl Drop for LocalInterpreterProcess {
    fn drop(&mut self) {
        self.force_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_not_running() {
        let process = LocalInterpreterProcess::new(
            LaunchConfig::new("/nonexistent/lattice-worker").with_connect_timeout(Duration::from_millis(200)),
        );
        process.start();
        assert!(!process.is_running());
        assert!(process.pid().is_none());
        process.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_child_is_killed_after_connect_timeout() {
        // `sh -c script --port N` runs the script; the flag lands in $0 and $1.
        let process = LocalInterpreterProcess::new(
            LaunchConfig::new("/bin/sh")
                .with_arg("-c")
                .with_arg("sleep 10")
                .with_connect_timeout(Duration::from_millis(300)),
        );

        let start = Instant::now();
        process.start();

        assert!(!process.is_running());
        assert!(process.pid().is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_that_exits_early_stops_the_wait() {
        let process = LocalInterpreterProcess::new(
            LaunchConfig::new("/bin/sh")
                .with_arg("-c")
                .with_arg("exit 3")
                .with_connect_timeout(Duration::from_secs(20)),
        );

        let start = Instant::now();
        process.start();

        assert!(!process.is_running());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_work_dir_and_env_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let process = LocalInterpreterProcess::new(
            LaunchConfig::new("/bin/sh")
                .with_arg("-c")
                .with_arg("echo \"$LATTICE_TEST_VALUE\" > marker; sleep 10")
                .with_env("LATTICE_TEST_VALUE", "from-env")
                .with_work_dir(dir.path())
                .with_connect_timeout(Duration::from_millis(500)),
        );

        process.start();

        let marker = std::fs::read_to_string(dir.path().join("marker")).unwrap();
        assert_eq!(marker.trim(), "from-env");
    }

    #[test]
    fn test_stale_exit_watcher_leaves_new_child_running() {
        let state = ExitState::default();
        let first = state.begin();
        // Stopped, then relaunched before the first watcher noticed.
        state.mark_exited();
        let second = state.begin();

        assert!(!state.mark_exited_for(first));
        assert!(state.running.load(Ordering::SeqCst));

        assert!(state.mark_exited_for(second));
        assert!(!state.running.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[test]
    fn test_restart_reports_new_child() {
        let process = LocalInterpreterProcess::new(
            LaunchConfig::new("/bin/sh")
                .with_arg("-c")
                .with_arg("exit 0")
                .with_connect_timeout(Duration::from_secs(5)),
        );

        process.start();
        assert!(!process.is_running());
        let first = process.state.generation.load(Ordering::SeqCst);
        process.start();
        assert!(!process.is_running());
        assert_eq!(process.state.generation.load(Ordering::SeqCst), first + 1);
    }

    #[test]
    fn test_launch_config_defaults() {
        let config = LaunchConfig::new("worker");
        assert_eq!(config.port_flag, "--port");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.args.is_empty());
    }
}

//! Supervision of the long-lived browser backend.
//!
//! One [`SessionSupervisor`] per process owns the backend's lifecycle:
//!
//! ```text
//! Unknown --quick probe--> Healthy
//! Unknown --launch-------> Starting --probe ok--> Healthy
//!                          Starting --deadline--> Dead
//! Healthy --probe fails--> Dead
//! ```
//!
//! Launches are serialized twice: an in-process async mutex keeps tasks of
//! this process from racing, and an exclusive lock file keeps other processes
//! from launching at the same time. Whoever loses either race waits and then
//! reuses the winner's backend.

pub mod launcher;
pub mod lock;
pub mod probe;
pub mod process;

use crate::classify::Fault;
use crate::config::{deadline_after, SessionConfig};
use launcher::{BackendLauncher, ChromiumLauncher};
use lock::LaunchLock;
use probe::{ControlEndpoint, ControlProbe, HttpControlProbe, ProbeError};
use process::PidFile;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A healthy result younger than this is returned without probing again.
pub const HEALTH_FRESHNESS: Duration = Duration::from_secs(2);

/// What [`SessionSupervisor::shutdown`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No backend PID was recorded.
    NothingRecorded,
    /// The recorded PID was not a running backend.
    NotRunning(u32),
    /// The backend was told to terminate.
    Terminated(u32),
}

/// Lifecycle status of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unknown,
    Healthy,
    Starting,
    Dead,
}

/// Snapshot of what the supervisor knows about the backend.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub port: u16,
    pub pid: Option<u32>,
    pub status: SessionStatus,
    pub last_checked_at: Option<Instant>,
    pub endpoint: Option<ControlEndpoint>,
}

impl SessionState {
    fn new(port: u16) -> Self {
        Self {
            port,
            pid: None,
            status: SessionStatus::Unknown,
            last_checked_at: None,
            endpoint: None,
        }
    }
}

/// Errors raised while bringing the backend up.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session timeout: backend not healthy after {waited:?}")]
    Timeout { waited: Duration },

    #[error("session timeout: launch lock held by another launcher for {waited:?}")]
    LockContention { waited: Duration },

    #[error("backend launch failed: {0}")]
    Launch(String),

    #[error("backend executable not found")]
    BackendNotFound,

    #[error("backend unreachable: {0}")]
    Unreachable(#[from] ProbeError),

    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Both flavours of waiting too long count as a session timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::LockContention { .. })
    }
}

impl From<SessionError> for Fault {
    fn from(err: SessionError) -> Self {
        Fault::new(err.to_string())
    }
}

/// Owns the backend process lifecycle for one control port.
pub struct SessionSupervisor {
    config: SessionConfig,
    probe: Arc<dyn ControlProbe>,
    launcher: Arc<dyn BackendLauncher>,
    state: Arc<Mutex<SessionState>>,
    launch_gate: tokio::sync::Mutex<()>,
    trusted: AtomicBool,
    pid_file: PidFile,
}

impl SessionSupervisor {
    /// Supervisor for a Chromium backend probed over HTTP.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backend(
            config,
            Arc::new(HttpControlProbe::new()),
            Arc::new(ChromiumLauncher::new()),
        )
    }

    pub fn with_backend(
        config: SessionConfig,
        probe: Arc<dyn ControlProbe>,
        launcher: Arc<dyn BackendLauncher>,
    ) -> Self {
        let state = SessionState::new(config.port);
        let pid_file = PidFile::new(&config.pid_path);
        let trusted = AtomicBool::new(config.force_trust);
        Self {
            config,
            probe,
            launcher,
            state: Arc::new(Mutex::new(state)),
            launch_gate: tokio::sync::Mutex::new(()),
            trusted,
            pid_file,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        lock_state(&self.state).clone()
    }

    pub fn status(&self) -> SessionStatus {
        lock_state(&self.state).status
    }

    /// Short-timeout health check.
    ///
    /// A recently confirmed healthy session is returned without any I/O;
    /// otherwise one probe runs, bounded by `probe_timeout`.
    pub async fn quick_check(&self) -> Result<ControlEndpoint, SessionError> {
        {
            let state = lock_state(&self.state);
            if state.status == SessionStatus::Healthy {
                if let (Some(endpoint), Some(at)) = (&state.endpoint, state.last_checked_at) {
                    if at.elapsed() < HEALTH_FRESHNESS {
                        return Ok(endpoint.clone());
                    }
                }
            }
        }

        match self.probe_once(self.config.probe_timeout).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                let mut state = lock_state(&self.state);
                if state.status == SessionStatus::Healthy {
                    warn!(port = self.config.port, error = %e, "backend stopped answering");
                    state.status = SessionStatus::Dead;
                    state.endpoint = None;
                }
                state.last_checked_at = Some(Instant::now());
                Err(e.into())
            }
        }
    }

    /// Make sure a healthy backend exists, launching one if needed.
    ///
    /// Never launches more than one backend for concurrent callers, in this
    /// process or in others sharing the lock file. Gives up after `timeout`.
    pub async fn ensure_healthy(
        &self,
        timeout: Duration,
    ) -> Result<ControlEndpoint, SessionError> {
        if let Ok(endpoint) = self.quick_check().await {
            return Ok(endpoint);
        }

        let deadline = deadline_after(timeout);
        let _gate = tokio::time::timeout_at(deadline, self.launch_gate.lock())
            .await
            .map_err(|_| SessionError::LockContention { waited: timeout })?;

        // Another task may have finished a launch while we waited.
        if let Ok(endpoint) = self.quick_check().await {
            return Ok(endpoint);
        }

        let _lock = loop {
            if let Some(lock) = LaunchLock::try_acquire(&self.config.lock_path)? {
                break lock;
            }
            debug!(
                lock = %self.config.lock_path.display(),
                "launch lock held elsewhere, waiting"
            );
            if let Ok(endpoint) = self.probe_once(self.bounded_probe(deadline)).await {
                return Ok(endpoint);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::LockContention { waited: timeout });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        };

        if let Ok(endpoint) = self.probe_once(self.bounded_probe(deadline)).await {
            return Ok(endpoint);
        }

        self.launch_and_wait(deadline, timeout).await
    }

    /// Trust the backend without probing it.
    ///
    /// Returns the last known endpoint, or one built from the configured port.
    /// Callers that then fail to connect must call [`report_unreachable`]
    /// and go through [`ensure_healthy`].
    ///
    /// [`report_unreachable`]: Self::report_unreachable
    /// [`ensure_healthy`]: Self::ensure_healthy
    pub fn force_trust(&self) -> ControlEndpoint {
        self.trusted.store(true, Ordering::Relaxed);
        lock_state(&self.state)
            .endpoint
            .clone()
            .unwrap_or_else(|| ControlEndpoint::unverified(self.config.port))
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::Relaxed)
    }

    /// Endpoint for a caller about to connect: trusted, or verified healthy.
    pub async fn acquire(&self) -> Result<ControlEndpoint, SessionError> {
        if self.is_trusted() {
            return Ok(self.force_trust());
        }
        self.ensure_healthy(self.config.health_timeout).await
    }

    /// A caller could not reach the backend at the endpoint it was given.
    pub fn report_unreachable(&self) {
        self.trusted.store(false, Ordering::Relaxed);
        let mut state = lock_state(&self.state);
        if state.status == SessionStatus::Healthy || state.status == SessionStatus::Unknown {
            state.status = SessionStatus::Dead;
        }
        state.endpoint = None;
        state.last_checked_at = None;
    }

    /// Stop the backend recorded in state or in the PID file.
    ///
    /// A recorded PID that is not our backend is left alone; only the record
    /// is cleared.
    pub fn shutdown(&self) -> ShutdownOutcome {
        let pid = lock_state(&self.state).pid.or_else(|| self.pid_file.read());
        let outcome = match pid {
            None => ShutdownOutcome::NothingRecorded,
            Some(pid) if self.launcher.owns_process(pid, self.config.port) => {
                self.launcher.terminate(pid);
                ShutdownOutcome::Terminated(pid)
            }
            Some(pid) => {
                debug!(pid, "recorded backend is not running");
                ShutdownOutcome::NotRunning(pid)
            }
        };
        self.pid_file.remove();
        self.trusted.store(false, Ordering::Relaxed);

        let mut state = lock_state(&self.state);
        state.status = SessionStatus::Dead;
        state.pid = None;
        state.endpoint = None;
        outcome
    }

    async fn launch_and_wait(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ControlEndpoint, SessionError> {
        let port = self.config.port;
        let (pid, launched) = match self.pid_file.read() {
            Some(pid) if self.launcher.owns_process(pid, port) => {
                info!(pid, port, "backend already starting, waiting for it");
                (pid, false)
            }
            recorded => {
                if let Some(pid) = recorded {
                    warn!(
                        pid,
                        path = %self.pid_file.path().display(),
                        "discarding stale backend pid file"
                    );
                }
                if self.pid_file.exists() {
                    self.pid_file.remove();
                }
                let backend = self.launcher.launch(&self.config)?;
                if let Err(e) = self.pid_file.write(backend.pid) {
                    self.launcher.terminate(backend.pid);
                    return Err(e.into());
                }
                if let Some(child) = backend.child {
                    self.watch_exit(backend.pid, child);
                }
                (backend.pid, true)
            }
        };

        {
            let mut state = lock_state(&self.state);
            state.pid = Some(pid);
            state.status = SessionStatus::Starting;
            state.endpoint = None;
        }

        loop {
            match self.probe_once(self.bounded_probe(deadline)).await {
                Ok(endpoint) => {
                    info!(pid, port, "backend healthy");
                    return Ok(endpoint);
                }
                Err(e) => debug!(pid, error = %e, "backend not ready yet"),
            }

            if lock_state(&self.state).status == SessionStatus::Dead {
                self.pid_file.remove();
                return Err(SessionError::Launch(format!("process {pid} exited during startup")));
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }

        warn!(pid, port, waited = ?timeout, "backend did not become healthy");
        if launched {
            self.launcher.terminate(pid);
            self.pid_file.remove();
        }
        let mut state = lock_state(&self.state);
        state.status = SessionStatus::Dead;
        state.pid = None;
        Err(SessionError::Timeout { waited: timeout })
    }

    /// One probe, hard-bounded even if the probe ignores its timeout.
    async fn probe_once(&self, timeout: Duration) -> Result<ControlEndpoint, ProbeError> {
        let port = self.config.port;
        let result = match tokio::time::timeout(timeout, self.probe.probe(port, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        if let Ok(endpoint) = &result {
            let mut state = lock_state(&self.state);
            if state.pid.is_none() {
                state.pid = self.pid_file.read();
            }
            state.status = SessionStatus::Healthy;
            state.endpoint = Some(endpoint.clone());
            state.last_checked_at = Some(Instant::now());
        }
        result
    }

    fn bounded_probe(&self, deadline: Instant) -> Duration {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.config.probe_timeout.min(remaining).max(Duration::from_millis(1))
    }

    /// Mark the session dead if the launched process exits on its own.
    fn watch_exit(&self, pid: u32, mut child: tokio::process::Child) {
        let state = Arc::clone(&self.state);
        let pid_file = self.pid_file.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let mut state = lock_state(&state);
            if state.pid != Some(pid) {
                return;
            }
            warn!(pid, status = ?status.ok(), "browser backend exited");
            state.status = SessionStatus::Dead;
            state.pid = None;
            state.endpoint = None;
            if pid_file.read() == Some(pid) {
                pid_file.remove();
            }
        });
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

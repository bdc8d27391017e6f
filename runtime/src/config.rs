//! Runtime configuration from `WF_*` environment variables.
//!
//! Values are read once at startup through a lookup function so the parsing
//! can be exercised without touching the process environment. Invalid values
//! are never clamped: they are rejected with a warning and the default is
//! used instead.

use crate::orchestrator::backoff::RetryPlan;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub const ENV_TIMEOUT: &str = "WF_TIMEOUT";
pub const ENV_PORT: &str = "WF_PORT";
pub const ENV_LOCK_PATH: &str = "WF_LOCK_PATH";
pub const ENV_PID_PATH: &str = "WF_PID_PATH";
pub const ENV_PROFILE_DIR: &str = "WF_PROFILE_DIR";
pub const ENV_CHROMIUM_PATH: &str = "WF_CHROMIUM_PATH";
pub const ENV_ROUTES: &str = "WF_ROUTES";
pub const ENV_ATTEMPT_TIMEOUT_MS: &str = "WF_ATTEMPT_TIMEOUT_MS";
pub const ENV_FETCH_BUDGET_SECS: &str = "WF_FETCH_BUDGET_SECS";
pub const ENV_RETRY_ATTEMPTS: &str = "WF_RETRY_ATTEMPTS";
pub const ENV_FORCE_TRUST: &str = "WF_FORCE_TRUST";
pub const ENV_AUDIT_LOG: &str = "WF_AUDIT_LOG";

/// Default backend health-check timeout (seconds).
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 15;
pub const MIN_HEALTH_TIMEOUT_SECS: u64 = 5;
pub const MAX_HEALTH_TIMEOUT_SECS: u64 = 300;

/// Default backend control-endpoint port.
pub const DEFAULT_CONTROL_PORT: u16 = 9222;

/// Quick-check probe timeout. Independent of the health-check timeout.
pub const QUICK_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between health probes while a backend starts.
pub const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_ATTEMPT_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_FETCH_BUDGET_SECS: u64 = 120;
pub const MAX_FETCH_BUDGET_SECS: u64 = 3_600;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// A rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid number")]
    NotANumber { var: &'static str, value: String },

    #[error("{var}={value} is outside the accepted range {min}..={max}")]
    OutOfRange {
        var: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Settings owned by the session supervisor.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    /// Upper bound for `ensure_healthy` when no explicit timeout is given.
    pub health_timeout: Duration,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub lock_path: PathBuf,
    pub pid_path: PathBuf,
    pub profile_dir: PathBuf,
    pub chromium_path: Option<PathBuf>,
    pub force_trust: bool,
}

impl SessionConfig {
    /// Defaults with lock, PID and profile paths under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            port: DEFAULT_CONTROL_PORT,
            health_timeout: Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS),
            probe_timeout: QUICK_PROBE_TIMEOUT,
            poll_interval: LAUNCH_POLL_INTERVAL,
            lock_path: dir.join("backend.lock"),
            pid_path: dir.join("backend.pid"),
            profile_dir: dir.join("profile"),
            chromium_path: None,
            force_trust: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::in_dir(&state_dir())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub session: SessionConfig,
    pub retry: RetryPlan,
    pub attempt_timeout: Duration,
    pub fetch_budget: Duration,
    pub routes_path: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            retry: RetryPlan::default(),
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            fetch_budget: Duration::from_secs(DEFAULT_FETCH_BUDGET_SECS),
            routes_path: None,
            audit_log: None,
        }
    }
}

impl FetchConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut cfg = Self::default();
        let session = &mut cfg.session;

        if let Some(raw) = read(ENV_TIMEOUT) {
            match parse_health_timeout(&raw) {
                Ok(timeout) => session.health_timeout = timeout,
                Err(e) => warn!(
                    "{e}; using default health-check timeout of {DEFAULT_HEALTH_TIMEOUT_SECS}s"
                ),
            }
        }
        if let Some(raw) = read(ENV_PORT) {
            match parse_bounded(ENV_PORT, &raw, 1, u16::MAX as u64) {
                Ok(port) => session.port = port as u16,
                Err(e) => warn!("{e}; using default port {DEFAULT_CONTROL_PORT}"),
            }
        }
        if let Some(p) = read(ENV_LOCK_PATH) {
            session.lock_path = PathBuf::from(p);
        }
        if let Some(p) = read(ENV_PID_PATH) {
            session.pid_path = PathBuf::from(p);
        }
        if let Some(p) = read(ENV_PROFILE_DIR) {
            session.profile_dir = PathBuf::from(p);
        }
        if let Some(p) = read(ENV_CHROMIUM_PATH) {
            session.chromium_path = Some(PathBuf::from(p));
        }
        session.force_trust = read(ENV_FORCE_TRUST).is_some_and(|v| is_truthy(&v));

        if let Some(raw) = read(ENV_ATTEMPT_TIMEOUT_MS) {
            match parse_bounded(ENV_ATTEMPT_TIMEOUT_MS, &raw, 1, MAX_ATTEMPT_TIMEOUT_MS) {
                Ok(ms) => cfg.attempt_timeout = Duration::from_millis(ms),
                Err(e) => {
                    warn!("{e}; using default attempt timeout of {DEFAULT_ATTEMPT_TIMEOUT_MS}ms")
                }
            }
        }
        if let Some(raw) = read(ENV_FETCH_BUDGET_SECS) {
            match parse_bounded(ENV_FETCH_BUDGET_SECS, &raw, 1, MAX_FETCH_BUDGET_SECS) {
                Ok(secs) => cfg.fetch_budget = Duration::from_secs(secs),
                Err(e) => warn!("{e}; using default fetch budget of {DEFAULT_FETCH_BUDGET_SECS}s"),
            }
        }
        if let Some(raw) = read(ENV_RETRY_ATTEMPTS) {
            match parse_bounded(ENV_RETRY_ATTEMPTS, &raw, 1, MAX_RETRY_ATTEMPTS as u64) {
                Ok(n) => cfg.retry.max_attempts = n as u32,
                Err(e) => warn!("{e}; using default of {} attempts", cfg.retry.max_attempts),
            }
        }

        cfg.routes_path = read(ENV_ROUTES).map(PathBuf::from);
        cfg.audit_log = read(ENV_AUDIT_LOG).map(PathBuf::from);
        cfg
    }
}

/// Validate a `WF_TIMEOUT` value (whole seconds, 5–300 inclusive).
pub fn parse_health_timeout(raw: &str) -> Result<Duration, ConfigError> {
    parse_bounded(
        ENV_TIMEOUT,
        raw,
        MIN_HEALTH_TIMEOUT_SECS,
        MAX_HEALTH_TIMEOUT_SECS,
    )
    .map(Duration::from_secs)
}

/// Validate a fetch budget in whole seconds (1 to [`MAX_FETCH_BUDGET_SECS`]).
pub fn parse_fetch_budget(secs: u64) -> Result<Duration, ConfigError> {
    parse_bounded(
        ENV_FETCH_BUDGET_SECS,
        &secs.to_string(),
        1,
        MAX_FETCH_BUDGET_SECS,
    )
    .map(Duration::from_secs)
}

/// `now + timeout`, saturating far in the future instead of overflowing.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn parse_bounded(var: &'static str, raw: &str, min: u64, max: u64) -> Result<u64, ConfigError> {
    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::NotANumber {
        var,
        value: raw.to_string(),
    })?;
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            var,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// `~/.webfetch`, or `/tmp/.webfetch` without a home directory.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".webfetch")
}

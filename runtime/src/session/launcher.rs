//! Starting and stopping the headless browser backend.

use super::process::{command_line, pid_alive, terminate};
use super::SessionError;
use crate::config::{state_dir, SessionConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// A freshly spawned backend.
#[derive(Debug)]
pub struct LaunchedBackend {
    pub pid: u32,
    /// Handle used to observe early exit. Fakes leave it empty.
    pub child: Option<tokio::process::Child>,
}

/// Spawns and recognizes backend processes.
pub trait BackendLauncher: Send + Sync {
    /// Start a backend listening on `config.port`. Must not block on readiness.
    fn launch(&self, config: &SessionConfig) -> Result<LaunchedBackend, SessionError>;

    /// Whether `pid` is a live backend serving `port`.
    fn owns_process(&self, pid: u32, port: u16) -> bool;

    fn terminate(&self, pid: u32);
}

/// Launches headless Chromium with remote debugging enabled.
#[derive(Debug, Default, Clone)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Arguments passed to the browser for a given port and profile.
    pub fn args(port: u16, profile_dir: &Path) -> Vec<String> {
        vec![
            "--headless=new".into(),
            "--disable-gpu".into(),
            "--no-sandbox".into(),
            "--disable-dev-shm-usage".into(),
            "--disable-extensions".into(),
            "--disable-background-networking".into(),
            "--no-first-run".into(),
            "--no-default-browser-check".into(),
            format!("--remote-debugging-port={port}"),
            "--remote-debugging-address=127.0.0.1".into(),
            format!("--user-data-dir={}", profile_dir.display()),
            "about:blank".into(),
        ]
    }
}

impl BackendLauncher for ChromiumLauncher {
    fn launch(&self, config: &SessionConfig) -> Result<LaunchedBackend, SessionError> {
        let exe = find_chromium(config.chromium_path.as_deref())
            .ok_or(SessionError::BackendNotFound)?;
        std::fs::create_dir_all(&config.profile_dir)?;

        info!(exe = %exe.display(), port = config.port, "launching browser backend");
        let child = tokio::process::Command::new(&exe)
            .args(Self::args(config.port, &config.profile_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| SessionError::Launch(format!("{}: {e}", exe.display())))?;

        let pid = child
            .id()
            .ok_or_else(|| SessionError::Launch("process exited before reporting a pid".into()))?;
        debug!(pid, "browser backend spawned");
        Ok(LaunchedBackend {
            pid,
            child: Some(child),
        })
    }

    fn owns_process(&self, pid: u32, port: u16) -> bool {
        if !pid_alive(pid) {
            return false;
        }
        let marker = format!("--remote-debugging-port={port}");
        command_line(pid).is_some_and(|cmd| cmd.contains(&marker))
    }

    fn terminate(&self, pid: u32) {
        if terminate(pid) {
            info!(pid, "sent SIGTERM to browser backend");
        }
    }
}

/// Locate a Chromium binary.
///
/// Order: explicit path, `~/.webfetch/chromium/`, system `PATH`, then the
/// common macOS install location.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let local = state_dir().join("chromium");
    let candidates = if cfg!(target_os = "macos") {
        vec![
            local.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            local.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            local.join("chrome"),
        ]
    } else {
        vec![local.join("chrome-linux64/chrome"), local.join("chrome")]
    };
    if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
        return Some(found);
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

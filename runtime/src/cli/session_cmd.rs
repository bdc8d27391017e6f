//! `webfetch session {status,start,stop}`.

use crate::cli::output::{is_json, note, print_json};
use crate::config::FetchConfig;
use crate::session::process::{pid_alive, PidFile};
use crate::session::{SessionSupervisor, ShutdownOutcome};
use anyhow::{bail, Context, Result};
use std::time::Duration;

fn supervisor() -> SessionSupervisor {
    SessionSupervisor::new(FetchConfig::from_env().session)
}

/// Report whether a backend answers on the configured port.
pub async fn status() -> Result<()> {
    let supervisor = supervisor();
    let config = supervisor.config();
    let pid = PidFile::new(&config.pid_path).read();
    let check = supervisor.quick_check().await;

    if is_json() {
        let (healthy, browser, error) = match &check {
            Ok(endpoint) => (true, endpoint.browser.clone(), None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        print_json(&serde_json::json!({
            "port": config.port,
            "pid": pid,
            "healthy": healthy,
            "browser": browser,
            "error": error,
            "pid_file": config.pid_path.display().to_string(),
            "lock_file": config.lock_path.display().to_string(),
        }));
        return Ok(());
    }

    println!("Backend on port {}", config.port);
    match pid {
        Some(pid) => {
            let liveness = if pid_alive(pid) { "alive" } else { "not running" };
            println!("  PID:    {pid} ({liveness})");
        }
        None => println!("  PID:    none recorded"),
    }
    match check {
        Ok(endpoint) => {
            println!("  Status: healthy");
            if let Some(browser) = endpoint.browser {
                println!("  Browser: {browser}");
            }
            println!("  Endpoint: {}", endpoint.websocket_url);
        }
        Err(e) => println!("  Status: not reachable ({e})"),
    }
    Ok(())
}

/// Bring a backend up, reusing a healthy one.
pub async fn start() -> Result<()> {
    let supervisor = supervisor();
    let timeout = supervisor.config().health_timeout;
    note(format!(
        "Ensuring backend on port {} (timeout {}s)...",
        supervisor.config().port,
        timeout.as_secs()
    ));

    let endpoint = supervisor
        .ensure_healthy(timeout)
        .await
        .context("backend did not become healthy")?;
    let pid = supervisor.state().pid;

    if is_json() {
        print_json(&serde_json::json!({
            "port": endpoint.port,
            "pid": pid,
            "endpoint": endpoint.websocket_url,
            "browser": endpoint.browser,
        }));
    } else {
        println!("Backend healthy at {}", endpoint.websocket_url);
    }
    Ok(())
}

/// Terminate the recorded backend and wait briefly for it to exit.
pub async fn stop() -> Result<()> {
    let supervisor = supervisor();
    let pid_path = supervisor.config().pid_path.clone();

    let pid = match supervisor.shutdown() {
        ShutdownOutcome::Terminated(pid) => pid,
        ShutdownOutcome::NotRunning(pid) => {
            note(format!("Recorded PID {pid} is not a running backend. PID file removed."));
            return Ok(());
        }
        ShutdownOutcome::NothingRecorded => {
            bail!("no backend is recorded (no PID file at {})", pid_path.display())
        }
    };
    note(format!("Stopping backend (PID {pid})..."));

    // Up to 5 seconds.
    for _ in 0..50 {
        if !pid_alive(pid) {
            note("Backend stopped.");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    note("Warning: backend may still be running. PID file removed.");
    Ok(())
}

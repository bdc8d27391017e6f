//! Environment readiness check.

use crate::config::{state_dir, FetchConfig};
use crate::routing::Router;
use crate::session::launcher::find_chromium;
use crate::session::SessionSupervisor;
use anyhow::Result;

/// Check the browser executable, state directory, routing rules and memory.
pub async fn run() -> Result<()> {
    println!("Webfetch Doctor");
    println!("===============");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let config = FetchConfig::from_env();

    let chromium = find_chromium(config.session.chromium_path.as_deref());
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Set WF_CHROMIUM_PATH or install Chrome/Chromium."
        ),
    }

    let dir = state_dir();
    match std::fs::create_dir_all(&dir) {
        Ok(()) => println!("[OK] State directory: {}", dir.display()),
        Err(e) => println!("[!!] State directory {} not writable: {e}", dir.display()),
    }

    let routes_ok = match Router::load(config.routes_path.as_deref()) {
        Ok(router) => {
            println!("[OK] Routing rules loaded: {} rules", router.rules().count());
            true
        }
        Err(e) => {
            println!("[!!] Routing rules invalid: {e}");
            false
        }
    };

    match get_available_memory_mb() {
        Some(mb) if mb >= 256 => println!("[OK] Available memory: {mb}MB (>= 256MB required)"),
        Some(mb) => println!("[!!] Available memory: {mb}MB (< 256MB, may be insufficient)"),
        None => println!("[??] Could not determine available memory"),
    }

    let supervisor = SessionSupervisor::new(config.session.clone());
    match supervisor.quick_check().await {
        Ok(endpoint) => println!("[OK] Backend answering on port {}", endpoint.port),
        Err(_) => println!("[--] No backend on port {} (started on demand)", config.session.port),
    }

    println!();
    if chromium.is_some() && routes_ok {
        println!("Status: READY");
    } else if routes_ok {
        println!("Status: STATIC ONLY");
        println!("  Browser fetches will fall back or fail until Chromium is available.");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}

/// Available memory in MB (platform-specific).
fn get_available_memory_mb() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        let bytes: u64 = s.trim().parse().ok()?;
        Some(bytes / 1_048_576)
    }
    #[cfg(target_os = "linux")]
    {
        let output = std::process::Command::new("free").args(["-m"]).output().ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        s.lines()
            .find(|line| line.starts_with("Mem:"))
            .and_then(|line| line.split_whitespace().nth(6))
            .and_then(|v| v.parse().ok())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

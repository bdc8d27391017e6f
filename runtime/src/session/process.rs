//! OS process helpers and the backend PID file.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Whether a process with this PID exists.
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let output = Command::new("kill").args(["-0", &pid.to_string()]).output();
        matches!(output, Ok(o) if o.status.success())
    }
    #[cfg(not(unix))]
    {
        pid == std::process::id()
    }
}

/// Full command line of a running process, space separated.
pub fn command_line(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let joined = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        Some(joined)
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        let output = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "command="])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!s.is_empty()).then_some(s)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        None
    }
}

/// Send SIGTERM. Returns whether the signal was delivered.
pub fn terminate(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let output = Command::new("kill").arg(pid.to_string()).output();
        matches!(output, Ok(o) if o.status.success())
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// File holding the PID of the supervised backend.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// The recorded PID. `None` if the file is missing or unparsable.
    pub fn read(&self) -> Option<u32> {
        let s = std::fs::read_to_string(&self.path).ok()?;
        s.trim().parse().ok()
    }

    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, pid.to_string())
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

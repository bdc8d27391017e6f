//! Exclusive backend-launch lock.
//!
//! The lock is a file created with `create_new`, which is atomic across
//! processes. It contains the holder's PID; a lock whose holder is no longer
//! alive is stale and gets removed. Removal happens only while holding a
//! second `create_new` sentinel, and the holder is re-checked under it, so
//! two reclaimers can never delete each other's fresh lock. The guard deletes
//! the file on drop, so a cancelled launch never leaves the lock behind.

use super::process::pid_alive;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// A lock file that has no PID yet is only considered stale after this long.
const UNWRITTEN_LOCK_GRACE: Duration = Duration::from_secs(30);

/// Held launch lock. Released on drop.
#[derive(Debug)]
pub struct LaunchLock {
    path: PathBuf,
}

impl LaunchLock {
    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` while a live holder has it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<LaunchLock>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(guard) = create_lock(path)? {
            return Ok(Some(guard));
        }
        if !holder_is_stale(path) || !reclaim_stale(path)? {
            return Ok(None);
        }
        create_lock(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LaunchLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// `Ok(None)` when the file already exists.
fn create_lock(path: &Path) -> io::Result<Option<LaunchLock>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let guard = LaunchLock {
                path: path.to_path_buf(),
            };
            writeln!(file, "{}", std::process::id())?;
            Ok(Some(guard))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a stale lock under the reclaim sentinel.
///
/// Returns `false` when another caller is already reclaiming or the lock was
/// replaced by a live holder in the meantime.
fn reclaim_stale(path: &Path) -> io::Result<bool> {
    let sentinel = sentinel_path(path);
    let _sentinel = match OpenOptions::new().write(true).create_new(true).open(&sentinel) {
        Ok(_) => Sentinel(sentinel),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // A reclaimer that died mid-reclaim must not wedge the lock forever.
            if lock_age(&sentinel).is_some_and(|age| age > UNWRITTEN_LOCK_GRACE) {
                let _ = fs::remove_file(&sentinel);
            }
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    if !holder_is_stale(path) {
        return Ok(false);
    }
    warn!(path = %path.display(), "removing stale launch lock");
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

fn sentinel_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".reclaim");
    path.with_file_name(name)
}

struct Sentinel(PathBuf);

impl Drop for Sentinel {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn holder_is_stale(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(contents) => match contents.trim().parse::<u32>() {
            Ok(pid) => !pid_alive(pid),
            Err(_) => lock_age(path).is_some_and(|age| age > UNWRITTEN_LOCK_GRACE),
        },
        // Vanished between create and read: let the caller retry.
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

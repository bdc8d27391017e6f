//! JSONL audit logger, one line per completed fetch.
//!
//! - Append-only JSONL
//! - Rotation when the file exceeds `MAX_LOG_SIZE` (100 MB)
//! - Rotated files named `.1` (newest) to `.5` (oldest)

use crate::config::state_dir;
use crate::orchestrator::{FatalFailure, FetchReport};
use crate::routing::StrategyId;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Maximum audit log size before rotation (100 MB).
pub const MAX_LOG_SIZE: u64 = 100 * 1024 * 1024;

/// Number of rotated generations kept.
pub const MAX_ROTATIONS: u32 = 5;

/// One completed fetch.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub fetch_id: Uuid,
    pub url: String,
    /// `success` or `failure`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    pub attempts: usize,
}

impl AuditRecord {
    pub fn from_report(report: &FetchReport, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            fetch_id: report.fetch_id,
            url: report.url.clone(),
            outcome: "success",
            strategy: Some(report.strategy),
            reason: None,
            duration_ms: elapsed.as_millis() as u64,
            attempts: report.attempts.len(),
        }
    }

    pub fn from_failure(failure: &FatalFailure, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            fetch_id: failure.fetch_id,
            url: failure.url.clone(),
            outcome: "failure",
            strategy: failure.attempts.last().map(|a| a.strategy),
            reason: Some(failure.reason.to_string()),
            duration_ms: elapsed.as_millis() as u64,
            attempts: failure.attempts.len(),
        }
    }
}

/// Append-only JSONL logger with size-based rotation.
pub struct AuditLogger {
    file: File,
    path: PathBuf,
    max_size: u64,
    /// Approximate current size.
    current_size: u64,
}

impl AuditLogger {
    /// Open or create the audit log file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_limit(path, MAX_LOG_SIZE)
    }

    pub fn open_with_limit(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = open_append(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            max_size,
            current_size,
        })
    }

    /// `~/.webfetch/audit.jsonl`.
    pub fn default_path() -> PathBuf {
        state_dir().join("audit.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, record: &AuditRecord) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let json = serde_json::to_string(record)?;
        writeln!(self.file, "{json}").context("failed to append audit record")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// audit.jsonl → audit.jsonl.1, .1 → .2, ... dropping the oldest.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = open_append(&self.path).context("failed to reopen audit log after rotation")?;
        self.current_size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open audit log: {}", path.display()))
}

/// `audit.jsonl.1`, `audit.jsonl.2`, ...
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audit.jsonl")
    );
    base.with_file_name(name)
}

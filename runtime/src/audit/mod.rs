//! Optional JSONL audit trail of completed fetches.

pub mod logger;

pub use logger::{AuditLogger, AuditRecord};

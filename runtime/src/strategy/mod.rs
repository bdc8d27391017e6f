//! Fetch strategies.
//!
//! A strategy makes exactly one attempt per call and reports failure as a
//! [`Fault`] value. Retries, backoff and fallback all belong to the
//! orchestrator.

pub mod browser;
pub mod direct;
pub mod inspect;

pub use browser::BrowserStrategy;
pub use direct::DirectStrategy;

use crate::classify::Fault;
use crate::routing::StrategyId;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Retrieved document, handed to the content-extraction stage untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    /// Requested URL.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub body: String,
}

/// One way of retrieving a URL.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Single attempt, finished or abandoned within `timeout`.
    async fn attempt(&self, url: &Url, timeout: Duration) -> Result<Content, Fault>;
}

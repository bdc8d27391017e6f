//! Static fetch over plain HTTP.

use super::inspect::inspect_document;
use super::{Content, FetchStrategy};
use crate::classify::Fault;
use crate::routing::StrategyId;
use async_trait::async_trait;
use std::error::Error as _;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Chrome user agent sent by the direct strategy.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                              AppleWebKit/537.36 (KHTML, like Gecko) \
                              Chrome/131.0.0.0 Safari/537.36";

pub const MAX_REDIRECTS: usize = 5;

/// Single HTTP GET with no retries of its own.
#[derive(Clone)]
pub struct DirectStrategy {
    client: reqwest::Client,
}

impl DirectStrategy {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for DirectStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Static
    }

    async fn attempt(&self, url: &Url, timeout: Duration) -> Result<Content, Fault> {
        let resp = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_fault)?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let reason = status.canonical_reason().unwrap_or("");
            let message = format!("HTTP {} {reason}", status.as_u16());
            let fault = Fault::with_status(status.as_u16(), message.trim_end());
            return Err(fault.retry_after(retry_after));
        }

        let body = resp.text().await.map_err(transport_fault)?;
        debug!(%final_url, bytes = body.len(), "direct fetch complete");
        inspect_document(content_type.as_deref(), &body)?;

        Ok(Content {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Fault text from a reqwest error and its whole source chain.
///
/// The interesting part (DNS, TLS alert, reset) usually sits a few levels
/// down the chain.
fn transport_fault(err: reqwest::Error) -> Fault {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    if err.is_timeout() && !message.contains("timed out") {
        message.push_str(" (timed out)");
    }
    Fault::new(message)
}

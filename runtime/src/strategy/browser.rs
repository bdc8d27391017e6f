//! Rendered fetch through the supervised headless browser.

use super::inspect::inspect_rendered;
use super::{Content, FetchStrategy};
use crate::classify::Fault;
use crate::config::deadline_after;
use crate::routing::StrategyId;
use crate::session::probe::ControlEndpoint;
use crate::session::SessionSupervisor;
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Event loop of one DevTools connection. Aborted on drop.
struct HandlerTask(JoinHandle<()>);

impl HandlerTask {
    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Connection {
    websocket_url: String,
    browser: Arc<Browser>,
    handler: HandlerTask,
}

impl Connection {
    fn is_usable_for(&self, endpoint: &ControlEndpoint) -> bool {
        self.websocket_url == endpoint.websocket_url && !self.handler.is_finished()
    }
}

/// Fetches by driving the shared backend over the DevTools protocol.
///
/// One DevTools connection is kept per backend endpoint and shared by every
/// attempt. Each attempt opens its own page and closes it afterwards. The
/// backend itself is never closed here; it outlives every fetch.
pub struct BrowserStrategy {
    supervisor: Arc<SessionSupervisor>,
    connection: Mutex<Option<Connection>>,
    connections_opened: AtomicUsize,
}

impl BrowserStrategy {
    pub fn new(supervisor: Arc<SessionSupervisor>) -> Self {
        Self {
            supervisor,
            connection: Mutex::new(None),
            connections_opened: AtomicUsize::new(0),
        }
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    /// DevTools connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// The shared connection for `endpoint`, connecting if there is none.
    async fn browser(&self, endpoint: &ControlEndpoint) -> Result<Arc<Browser>, String> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref().filter(|c| c.is_usable_for(endpoint)) {
            return Ok(Arc::clone(&conn.browser));
        }
        // Replacing the old connection aborts its handler.
        *slot = None;

        let (browser, mut handler) = Browser::connect(endpoint.websocket_url.clone())
            .await
            .map_err(|e| e.to_string())?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        debug!(port = endpoint.port, "connected to browser backend");

        let browser = Arc::new(browser);
        *slot = Some(Connection {
            websocket_url: endpoint.websocket_url.clone(),
            browser: Arc::clone(&browser),
            handler: HandlerTask(handler),
        });
        Ok(browser)
    }

    async fn disconnect(&self) {
        self.connection.lock().await.take();
    }

    async fn render(
        &self,
        browser: &Browser,
        url: &Url,
        deadline: Instant,
    ) -> Result<Content, Fault> {
        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                self.disconnect().await;
                return Err(Fault::new(format!("browser page creation failed: {e}")));
            }
        };

        let result: Result<Content, Fault> = async {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, page.goto(url.as_str())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(Fault::new(format!("navigation failed: {e}"))),
                Err(_) => {
                    return Err(Fault::new(format!(
                        "navigation timed out after {}ms",
                        remaining.as_millis()
                    )))
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining, page.wait_for_navigation()).await;

            let html: String = page
                .evaluate("document.documentElement.outerHTML")
                .await
                .map_err(|e| Fault::new(format!("failed to read rendered document: {e}")))?
                .into_value()
                .map_err(|e| Fault::new(format!("failed to read rendered document: {e:?}")))?;

            let final_url = page
                .url()
                .await
                .ok()
                .flatten()
                .map(|u| u.to_string())
                .unwrap_or_else(|| url.to_string());

            inspect_rendered(&html)?;
            Ok(Content {
                url: url.to_string(),
                final_url,
                // The DevTools navigation result does not expose the status.
                status: 200,
                content_type: Some("text/html".to_string()),
                body: html,
            })
        }
        .await;

        let _ = page.close().await;
        result
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Browser
    }

    async fn attempt(&self, url: &Url, timeout: Duration) -> Result<Content, Fault> {
        let deadline = deadline_after(timeout);
        let trusted = self.supervisor.is_trusted();
        let timed_out = || Fault::new(format!("attempt timed out after {}ms", timeout.as_millis()));

        let endpoint = tokio::time::timeout_at(deadline, self.supervisor.acquire())
            .await
            .map_err(|_| timed_out())??;

        let browser = match self.browser(&endpoint).await {
            Ok(browser) => browser,
            Err(e) if trusted => {
                // Trusted endpoint was wrong: verify and try once more.
                warn!(
                    port = endpoint.port,
                    error = %e,
                    "trusted backend unreachable, re-verifying"
                );
                self.supervisor.report_unreachable();
                let endpoint = tokio::time::timeout_at(
                    deadline,
                    self.supervisor.ensure_healthy(self.supervisor.config().health_timeout),
                )
                .await
                .map_err(|_| timed_out())??;
                self.browser(&endpoint)
                    .await
                    .map_err(|e| Fault::new(format!("backend unreachable: {e}")))?
            }
            Err(e) => {
                self.supervisor.report_unreachable();
                return Err(Fault::new(format!("backend unreachable: {e}")));
            }
        };

        debug!(%url, port = endpoint.port, "rendering in browser backend");
        self.render(&browser, url, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    #[tokio::test]
    async fn test_handler_task_is_aborted_on_drop() {
        let alive = Arc::new(());
        let held = Arc::clone(&alive);
        let task = HandlerTask(tokio::spawn(async move {
            let _held = held;
            std::future::pending::<()>().await;
        }));
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        drop(task);
        for _ in 0..100 {
            if Arc::strong_count(&alive) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(Arc::strong_count(&alive), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_opens_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = BrowserStrategy::new(Arc::new(SessionSupervisor::new(
            SessionConfig::in_dir(dir.path()),
        )));
        let endpoint = ControlEndpoint::unverified(1);

        assert!(strategy.browser(&endpoint).await.is_err());
        assert_eq!(strategy.connections_opened(), 0);
        assert!(strategy.connection.lock().await.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_browser_renders_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::in_dir(dir.path());
        config.port = 9333;
        config.health_timeout = Duration::from_secs(30);
        let supervisor = Arc::new(SessionSupervisor::new(config));
        let strategy = BrowserStrategy::new(Arc::clone(&supervisor));

        let url = Url::parse("data:text/html,<h1>Hello</h1><p>World</p>").unwrap();
        let content = strategy.attempt(&url, Duration::from_secs(30)).await.unwrap();
        assert!(content.body.contains("<h1>Hello</h1>"));

        // Later attempts reuse the same DevTools connection.
        let url = Url::parse("data:text/html,<p>Again</p>").unwrap();
        let content = strategy.attempt(&url, Duration::from_secs(30)).await.unwrap();
        assert!(content.body.contains("<p>Again</p>"));
        assert_eq!(strategy.connections_opened(), 1);

        supervisor.shutdown();
    }
}

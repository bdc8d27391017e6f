//! Health probe against the backend's control endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a healthy backend can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEndpoint {
    pub port: u16,
    /// DevTools websocket URL, or the plain HTTP control URL when it was
    /// not looked up (trusted mode without a prior probe).
    pub websocket_url: String,
    /// Backend product string, e.g. `HeadlessChrome/131.0.6778.85`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

impl ControlEndpoint {
    /// Endpoint addressed by port only, without probing.
    pub fn unverified(port: u16) -> Self {
        Self {
            port,
            websocket_url: format!("http://127.0.0.1:{port}"),
            browser: None,
        }
    }
}

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("control endpoint refused the connection")]
    Refused,

    #[error("control endpoint probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("control endpoint answered with HTTP {0}")]
    Status(u16),

    #[error("control endpoint returned an unexpected body: {0}")]
    BadResponse(String),

    #[error("control endpoint transport error: {0}")]
    Transport(String),
}

/// A health check for the backend control endpoint.
///
/// Probes are idempotent reads and may run concurrently.
#[async_trait]
pub trait ControlProbe: Send + Sync {
    async fn probe(&self, port: u16, timeout: Duration) -> Result<ControlEndpoint, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser")]
    browser: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Probes `GET http://<host>:<port>/json/version`.
#[derive(Clone)]
pub struct HttpControlProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpControlProbe {
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    pub fn with_host(host: &str) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            client,
            host: host.to_string(),
        }
    }
}

impl Default for HttpControlProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlProbe for HttpControlProbe {
    async fn probe(&self, port: u16, timeout: Duration) -> Result<ControlEndpoint, ProbeError> {
        let url = format!("http://{}:{port}/json/version", self.host);
        let resp = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(timeout)
                } else if e.is_connect() {
                    ProbeError::Refused
                } else {
                    ProbeError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let info: VersionInfo = resp
            .json()
            .await
            .map_err(|e| ProbeError::BadResponse(e.to_string()))?;

        Ok(ControlEndpoint {
            port,
            websocket_url: info.web_socket_debugger_url,
            browser: info.browser,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_probe_parses_version_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Browser": "HeadlessChrome/131.0.0.0",
                "Protocol-Version": "1.3",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
            })))
            .mount(&server)
            .await;

        let port = server.address().port();
        let endpoint = HttpControlProbe::new()
            .probe(port, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(endpoint.port, port);
        assert_eq!(endpoint.websocket_url, "ws://127.0.0.1:9222/devtools/browser/abc");
        assert_eq!(endpoint.browser.as_deref(), Some("HeadlessChrome/131.0.0.0"));
    }

    #[tokio::test]
    async fn test_probe_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = HttpControlProbe::new()
            .probe(server.address().port(), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Status(500));
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = HttpControlProbe::new()
            .probe(server.address().port(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Timeout(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_probe_refused_when_nothing_listens() {
        // Bind then release a port so nothing is listening on it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = HttpControlProbe::new()
            .probe(port, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Refused);
    }
}

//! Fault classification.
//!
//! A strategy failure is reduced to a [`Fault`] (message text plus optional
//! HTTP status). [`ErrorClassifier`] buckets it into a coarse
//! [`FaultCategory`] using the ordered pattern table in [`patterns`], then
//! maps the category to a [`Classification`]: how severe the fault is, what
//! the orchestrator should do next, and how long the decision may be cached.
//!
//! Classification is a pure function of the fault. Identical input always
//! yields an identical classification, which is what makes caching by
//! [`FaultSignature`] sound.

pub mod cache;
pub mod patterns;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cache lifetime for decisions that will not change soon.
pub const LONG_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Cache lifetime for transient conditions.
pub const MEDIUM_TTL: Duration = Duration::from_secs(10 * 60);

/// Cache lifetime for unrecognized faults, so they are revisited quickly.
pub const SHORT_TTL: Duration = Duration::from_secs(30);

/// A normalized strategy failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Human-readable failure text, including any error source chain.
    pub message: String,
    /// HTTP status code, when the failure came from a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Server-provided retry hint (`Retry-After`), in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            retry_after_secs: None,
        }
    }

    pub fn retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    /// Lower-cased message with `_`/`-` folded to spaces and whitespace
    /// collapsed. Pattern matching runs against this form only.
    pub fn normalized_message(&self) -> String {
        let folded: String = self
            .message
            .chars()
            .map(|c| match c {
                '_' | '-' => ' ',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{status}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Coarse fault bucket. Two faults in the same bucket on the same host are
/// treated identically regardless of their exact text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultCategory {
    TlsLegacyRenegotiation,
    TlsHandshake,
    CertificateInvalid,
    Http2Protocol,
    TooManyRedirects,
    Forbidden,
    AntiBotChallenge,
    ScriptRequired,
    BadRequest,
    UnsupportedMedia,
    NotFound,
    Gone,
    Unauthorized,
    DnsResolution,
    InvalidUrl,
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    RateLimited,
    ServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    SessionTimeout,
    BackendUnavailable,
    Unrecognized,
}

impl FaultCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TlsLegacyRenegotiation => "tls-legacy-renegotiation",
            Self::TlsHandshake => "tls-handshake",
            Self::CertificateInvalid => "certificate-invalid",
            Self::Http2Protocol => "http2-protocol",
            Self::TooManyRedirects => "too-many-redirects",
            Self::Forbidden => "forbidden",
            Self::AntiBotChallenge => "anti-bot-challenge",
            Self::ScriptRequired => "script-required",
            Self::BadRequest => "bad-request",
            Self::UnsupportedMedia => "unsupported-media",
            Self::NotFound => "not-found",
            Self::Gone => "gone",
            Self::Unauthorized => "unauthorized",
            Self::DnsResolution => "dns-resolution",
            Self::InvalidUrl => "invalid-url",
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection-refused",
            Self::ConnectionReset => "connection-reset",
            Self::RateLimited => "rate-limited",
            Self::ServerError => "server-error",
            Self::BadGateway => "bad-gateway",
            Self::ServiceUnavailable => "service-unavailable",
            Self::GatewayTimeout => "gateway-timeout",
            Self::SessionTimeout => "session-timeout",
            Self::BackendUnavailable => "backend-unavailable",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a fault can ever succeed through the same strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Permanent,
    Temporary,
    Unknown,
}

/// What the orchestrator should do after a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Stop the whole fetch; no strategy can fix this.
    Abort,
    /// Re-attempt the same strategy after backoff, within its budget.
    Retry,
    /// Move on to the next strategy.
    Fallback,
}

/// The decision attached to a fault category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub severity: Severity,
    pub suggested_action: SuggestedAction,
    pub cache_ttl: Duration,
}

impl Classification {
    pub const fn new(
        severity: Severity,
        suggested_action: SuggestedAction,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            severity,
            suggested_action,
            cache_ttl,
        }
    }
}

/// Cache key: the host a fault occurred on plus its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FaultSignature {
    pub host: String,
    pub category: FaultCategory,
}

impl FaultSignature {
    pub fn new(host: &str, category: FaultCategory) -> Self {
        Self {
            host: host.trim_end_matches('.').to_ascii_lowercase(),
            category,
        }
    }
}

impl fmt::Display for FaultSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.category)
    }
}

/// Seam between the orchestrator and classification logic.
///
/// Implementations must be deterministic: the same fault always yields the
/// same category and classification.
pub trait FaultClassifier: Send + Sync {
    fn categorize(&self, fault: &Fault) -> FaultCategory;

    fn classify(&self, fault: &Fault) -> Classification {
        policy(self.categorize(fault))
    }
}

/// Table-driven classifier backed by [`patterns::PATTERNS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl FaultClassifier for ErrorClassifier {
    fn categorize(&self, fault: &Fault) -> FaultCategory {
        categorize(fault)
    }
}

/// Bucket a fault using the first matching pattern.
pub fn categorize(fault: &Fault) -> FaultCategory {
    let text = fault.normalized_message();
    patterns::PATTERNS
        .iter()
        .find(|p| p.matches(fault.status, &text))
        .map(|p| p.category)
        .unwrap_or(FaultCategory::Unrecognized)
}

/// Classify a fault: categorize, then apply the category policy.
pub fn classify(fault: &Fault) -> Classification {
    policy(categorize(fault))
}

/// Severity, action and cache lifetime for each category.
pub fn policy(category: FaultCategory) -> Classification {
    use FaultCategory::*;
    use Severity::*;
    use SuggestedAction::*;

    match category {
        TlsLegacyRenegotiation | TlsHandshake | CertificateInvalid | Http2Protocol
        | TooManyRedirects | Forbidden | AntiBotChallenge | ScriptRequired | BadRequest
        | UnsupportedMedia => Classification::new(Permanent, Fallback, LONG_TTL),
        NotFound | Gone | Unauthorized | InvalidUrl => {
            Classification::new(Permanent, Abort, LONG_TTL)
        }
        DnsResolution => Classification::new(Permanent, Abort, MEDIUM_TTL),
        Timeout | ConnectionRefused | ConnectionReset | RateLimited | ServerError
        | BadGateway | ServiceUnavailable | GatewayTimeout => {
            Classification::new(Temporary, Retry, MEDIUM_TTL)
        }
        SessionTimeout | BackendUnavailable => Classification::new(Permanent, Fallback, MEDIUM_TTL),
        Unrecognized => Classification::new(Unknown, Retry, SHORT_TTL),
    }
}

//! Ordered fault pattern table.
//!
//! Patterns are evaluated top to bottom and the first match wins, so more
//! specific entries must come before generic ones. Internally produced
//! session faults go first, then TLS renegotiation (it often arrives with a
//! generic transport message), then HTTP status codes, then transport text.
//!
//! Text matchers run against [`Fault::normalized_message`](super::Fault::normalized_message):
//! lower case, `_` and `-` folded to spaces.

use super::FaultCategory;
use super::FaultCategory::*;

/// How a pattern recognizes a fault.
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Exact HTTP status code.
    Status(u16),
    /// Inclusive HTTP status range.
    StatusRange(u16, u16),
    /// Normalized message contains the needle.
    Contains(&'static str),
    /// Normalized message contains every needle.
    AllOf(&'static [&'static str]),
}

/// One row of the table.
#[derive(Debug, Clone, Copy)]
pub struct Pattern {
    pub matcher: Matcher,
    pub category: FaultCategory,
}

impl Pattern {
    const fn new(matcher: Matcher, category: FaultCategory) -> Self {
        Self { matcher, category }
    }

    pub fn matches(&self, status: Option<u16>, text: &str) -> bool {
        match self.matcher {
            Matcher::Status(code) => status == Some(code),
            Matcher::StatusRange(lo, hi) => status.is_some_and(|s| (lo..=hi).contains(&s)),
            Matcher::Contains(needle) => text.contains(needle),
            Matcher::AllOf(needles) => needles.iter().all(|n| text.contains(n)),
        }
    }
}

use Matcher::{AllOf, Contains, Status, StatusRange};

pub static PATTERNS: &[Pattern] = &[
    // Session supervision
    Pattern::new(Contains("session timeout"), SessionTimeout),
    Pattern::new(Contains("launch lock"), SessionTimeout),
    Pattern::new(Contains("backend executable not found"), BackendUnavailable),
    Pattern::new(Contains("backend launch failed"), BackendUnavailable),
    Pattern::new(Contains("backend unreachable"), BackendUnavailable),
    Pattern::new(Contains("session i/o error"), BackendUnavailable),
    // TLS renegotiation
    Pattern::new(Contains("unsafe legacy renegotiation"), TlsLegacyRenegotiation),
    Pattern::new(Contains("legacy renegotiation"), TlsLegacyRenegotiation),
    Pattern::new(AllOf(&["renegotiation", "disabled"]), TlsLegacyRenegotiation),
    // HTTP status
    Pattern::new(Status(404), NotFound),
    Pattern::new(Status(410), Gone),
    Pattern::new(Status(451), Gone),
    Pattern::new(Status(401), Unauthorized),
    Pattern::new(Status(407), Unauthorized),
    Pattern::new(Status(403), Forbidden),
    Pattern::new(Status(429), RateLimited),
    Pattern::new(Status(408), Timeout),
    Pattern::new(Status(415), UnsupportedMedia),
    Pattern::new(Status(502), BadGateway),
    Pattern::new(Status(503), ServiceUnavailable),
    Pattern::new(Status(504), GatewayTimeout),
    Pattern::new(StatusRange(520, 530), BadGateway),
    Pattern::new(StatusRange(500, 599), ServerError),
    Pattern::new(StatusRange(400, 499), BadRequest),
    // Content inspection
    Pattern::new(Contains("challenge page"), AntiBotChallenge),
    Pattern::new(Contains("captcha"), AntiBotChallenge),
    Pattern::new(Contains("script required"), ScriptRequired),
    Pattern::new(Contains("empty document"), ScriptRequired),
    // Redirects and URLs
    Pattern::new(Contains("too many redirects"), TooManyRedirects),
    Pattern::new(Contains("err too many redirects"), TooManyRedirects),
    Pattern::new(Contains("relative url without a base"), InvalidUrl),
    Pattern::new(Contains("url scheme is not allowed"), InvalidUrl),
    Pattern::new(Contains("err invalid url"), InvalidUrl),
    // DNS
    Pattern::new(Contains("dns error"), DnsResolution),
    Pattern::new(Contains("failed to lookup address"), DnsResolution),
    Pattern::new(Contains("name or service not known"), DnsResolution),
    Pattern::new(Contains("err name not resolved"), DnsResolution),
    Pattern::new(Contains("no such host"), DnsResolution),
    // Certificates and handshakes
    Pattern::new(Contains("invalid peer certificate"), CertificateInvalid),
    Pattern::new(Contains("certificate verify failed"), CertificateInvalid),
    Pattern::new(Contains("err cert "), CertificateInvalid),
    Pattern::new(AllOf(&["certificate", "expired"]), CertificateInvalid),
    Pattern::new(Contains("self signed"), CertificateInvalid),
    Pattern::new(Contains("unknownissuer"), CertificateInvalid),
    Pattern::new(Contains("handshake failure"), TlsHandshake),
    Pattern::new(Contains("handshakefailure"), TlsHandshake),
    Pattern::new(Contains("err ssl"), TlsHandshake),
    Pattern::new(AllOf(&["tls", "alert"]), TlsHandshake),
    Pattern::new(Contains("ssl routines"), TlsHandshake),
    // HTTP/2
    Pattern::new(Contains("http2 error"), Http2Protocol),
    Pattern::new(Contains("err http2"), Http2Protocol),
    Pattern::new(Contains("goaway"), Http2Protocol),
    // Connection level
    Pattern::new(Contains("connection refused"), ConnectionRefused),
    Pattern::new(Contains("connection reset"), ConnectionReset),
    Pattern::new(Contains("connection closed before message completed"), ConnectionReset),
    Pattern::new(Contains("broken pipe"), ConnectionReset),
    Pattern::new(Contains("unexpected eof"), ConnectionReset),
    // Timeouts and throttling
    Pattern::new(Contains("timed out"), Timeout),
    Pattern::new(Contains("deadline has elapsed"), Timeout),
    Pattern::new(Contains("timeout"), Timeout),
    Pattern::new(Contains("too many requests"), RateLimited),
    Pattern::new(Contains("rate limit"), RateLimited),
];

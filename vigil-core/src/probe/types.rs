use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, VigilError};

/// HTTP method used for the primary attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    #[default]
    Head,
    Get,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Head => "HEAD",
            RequestMethod::Get => "GET",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HEAD" => Ok(RequestMethod::Head),
            "GET" => Ok(RequestMethod::Get),
            other => Err(VigilError::InvalidConfig(format!(
                "unsupported request method: {}",
                other
            ))),
        }
    }
}

/// The response headers worth keeping per result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub powered_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl HeaderSummary {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            server: text("server"),
            content_type: text("content-type"),
            powered_by: text("x-powered-by"),
            via: text("via"),
            cache_control: text("cache-control"),
            content_length: text("content-length").and_then(|v| v.parse().ok()),
            last_modified: text("last-modified"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// TLS certificate metadata as served by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslInfo {
    pub enabled: bool,
    /// False when the handshake only succeeded with verification disabled
    pub valid_by_trust_store: bool,
    pub issuer: String,
    pub subject: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub days_until_expiry: Option<i64>,
    pub self_signed: bool,
}

/// A response received from a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub http_code: u16,
    pub response_time_ms: u64,
    pub headers: HeaderSummary,
    /// Absolute target of a `Location` header, resolved against the request URL
    pub redirect_location: Option<String>,
    pub ssl: Option<SslInfo>,
}

impl ProbeResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.http_code) && self.redirect_location.is_some()
    }
}

/// One network attempt: a response, or the code of why none arrived.
pub type ProbeResult = std::result::Result<ProbeResponse, ErrorCode>;

/// Parameters of a single attempt.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    pub url: &'a str,
    pub method: RequestMethod,
    pub timeout: Duration,
    /// Firing this aborts the attempt with [`ErrorCode::Demote`]
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> ProbeRequest<'a> {
    pub fn new(url: &'a str, method: RequestMethod, timeout: Duration) -> Self {
        Self {
            url,
            method,
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<&'a CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

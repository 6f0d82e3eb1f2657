use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification carried by offline results and probe outcomes.
///
/// Network failures never surface as Rust errors; they are folded into one of
/// these codes and embedded in the per-domain result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Resolution produced no usable records (generic DNS failure)
    DnsFail,
    /// The resolver did not answer within the DNS timeout
    DnsTimeout,
    /// The name does not exist (NXDOMAIN)
    DnsNotFound,
    /// The name exists but has no A/AAAA records
    DnsNoRecords,
    /// Raw TCP connect failed for a reason other than timeout
    TcpFail,
    /// Raw TCP connect did not complete within the TCP timeout
    TcpTimeout,
    /// Application-layer request timeout
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    /// TLS handshake failed even with certificate verification disabled
    TlsFail,
    InvalidUrl,
    /// Internal lane-demotion signal, never stored in a final result
    Demote,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DnsFail => "DNS_FAIL",
            ErrorCode::DnsTimeout => "DNS_TIMEOUT",
            ErrorCode::DnsNotFound => "DNS_NOT_FOUND",
            ErrorCode::DnsNoRecords => "DNS_NO_RECORDS",
            ErrorCode::TcpFail => "TCP_FAIL",
            ErrorCode::TcpTimeout => "TCP_TIMEOUT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionReset => "CONNECTION_RESET",
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::TlsFail => "TLS_FAIL",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::Demote => "DEMOTE",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Whether the code belongs to the DNS class.
    pub fn is_dns(&self) -> bool {
        matches!(
            self,
            ErrorCode::DnsFail
                | ErrorCode::DnsTimeout
                | ErrorCode::DnsNotFound
                | ErrorCode::DnsNoRecords
        )
    }

    /// Whether the code counts as a request timeout for ramp and reporting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorCode::Timeout)
    }

    /// Maps an I/O error raised while connecting or talking to a peer.
    pub fn from_io(error: &std::io::Error) -> Option<Self> {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::ConnectionRefused => Some(ErrorCode::ConnectionRefused),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Some(ErrorCode::ConnectionReset),
            ErrorKind::TimedOut => Some(ErrorCode::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("DNS resolver setup failed: {0}")]
    Resolver(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage sink failed: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, VigilError>;

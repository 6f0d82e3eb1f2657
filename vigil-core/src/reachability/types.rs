use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Combined DNS + TCP outcome for a domain, independent of HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityInfo {
    pub dns: DnsInfo,
    /// Carries the `DNS_FAIL` sentinel when DNS failed and no connect was tried
    pub tcp: TcpInfo,
}

/// Result of the concurrent A/AAAA lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsInfo {
    /// At least one address came back from either family
    pub ok: bool,
    pub ipv4_list: Vec<Ipv4Addr>,
    pub ipv6_list: Vec<Ipv6Addr>,
    pub error: Option<ErrorCode>,
    pub elapsed_ms: u64,
}

/// Result of the raw connect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpInfo {
    pub ok: bool,
    /// Port that accepted, or the last port tried when all failed
    pub port: Option<u16>,
    pub elapsed_ms: Option<u64>,
    pub error: Option<ErrorCode>,
}

impl DnsInfo {
    /// All resolved addresses, IPv4 first.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4_list
            .iter()
            .copied()
            .map(IpAddr::V4)
            .chain(self.ipv6_list.iter().copied().map(IpAddr::V6))
    }

    /// The failure code to report when this lookup gates a check.
    pub fn failure(&self) -> ErrorCode {
        self.error.unwrap_or(ErrorCode::DnsFail)
    }
}

impl TcpInfo {
    /// Sentinel for "not attempted because DNS failed".
    pub fn skipped_dns_failed() -> Self {
        Self {
            ok: false,
            port: None,
            elapsed_ms: None,
            error: Some(ErrorCode::DnsFail),
        }
    }
}

/// Per-call overrides, used by the second pass to relax timeouts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReachabilityOverrides {
    pub dns_timeout: Option<Duration>,
    pub tcp_timeout: Option<Duration>,
    pub tcp_ports: Option<Vec<u16>>,
}

//! DNS + TCP reachability probing, independent of HTTP.

pub mod dns;
pub mod tcp;
pub mod types;

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::{CheckConfig, ReachabilityConfig};
use crate::error::Result;

pub use dns::DnsProber;
pub use tcp::{pick_target, probe_tcp, TcpTarget};
pub use types::{DnsInfo, ReachabilityInfo, ReachabilityOverrides, TcpInfo};

/// Source of reachability data for the orchestrator.
pub trait ReachabilityProbe: Send + Sync {
    /// False when reachability is switched off; callers then skip the DNS gate.
    fn enabled(&self) -> bool;

    /// `None` means "no reachability data", never "unreachable".
    fn reachability(
        &self,
        domain: &str,
        overrides: &ReachabilityOverrides,
    ) -> impl Future<Output = Option<ReachabilityInfo>> + Send;
}

/// Resolves DNS then probes TCP using the configured timeouts and ports.
#[derive(Debug, Clone)]
pub struct ReachabilityProber {
    dns: DnsProber,
    config: ReachabilityConfig,
    ipv4_only: bool,
}

impl ReachabilityProber {
    pub fn new(config: &CheckConfig) -> Result<Self> {
        let reach = &config.reachability;
        let dns = DnsProber::new(
            reach.nameserver.as_deref(),
            Duration::from_millis(reach.dns_timeout_ms),
        )?;
        Ok(Self {
            dns,
            config: reach.clone(),
            ipv4_only: config.force_ipv4,
        })
    }

    #[instrument(skip(self, overrides), fields(domain = %domain))]
    pub async fn get_reachability(
        &self,
        domain: &str,
        overrides: &ReachabilityOverrides,
    ) -> Option<ReachabilityInfo> {
        if !self.config.enabled {
            return None;
        }

        let dns_timeout = overrides
            .dns_timeout
            .unwrap_or(Duration::from_millis(self.config.dns_timeout_ms));
        let tcp_timeout = overrides
            .tcp_timeout
            .unwrap_or(Duration::from_millis(self.config.tcp_timeout_ms));
        let ports = overrides
            .tcp_ports
            .as_deref()
            .unwrap_or(&self.config.tcp_ports);

        let dns = self.dns.resolve(domain, dns_timeout).await;
        let tcp = if dns.ok {
            probe_tcp(domain, Some(&dns), tcp_timeout, ports, self.ipv4_only).await
        } else {
            TcpInfo::skipped_dns_failed()
        };

        debug!(dns_ok = dns.ok, tcp_ok = tcp.ok, "Reachability computed");
        Some(ReachabilityInfo { dns, tcp })
    }
}

impl ReachabilityProbe for ReachabilityProber {
    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn reachability(
        &self,
        domain: &str,
        overrides: &ReachabilityOverrides,
    ) -> impl Future<Output = Option<ReachabilityInfo>> + Send {
        self.get_reachability(domain, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tokio::net::TcpListener;

    fn prober(enabled: bool, ports: Vec<u16>) -> ReachabilityProber {
        let mut config = CheckConfig::default();
        config.reachability.enabled = enabled;
        config.reachability.tcp_ports = ports;
        config.reachability.nameserver = Some("127.0.0.1".to_string());
        ReachabilityProber::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_yields_no_data() {
        let prober = prober(false, vec![443]);
        assert!(!prober.enabled());
        let info = prober
            .reachability("127.0.0.1", &ReachabilityOverrides::default())
            .await;
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_ip_literal_reaches_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = prober(true, vec![port]);
        let info = prober
            .reachability("127.0.0.1", &ReachabilityOverrides::default())
            .await
            .unwrap();

        assert!(info.dns.ok);
        assert!(info.tcp.ok);
        assert_eq!(info.tcp.port, Some(port));
    }

    #[tokio::test]
    async fn test_overrides_replace_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = prober(true, vec![1]);
        let overrides = ReachabilityOverrides {
            tcp_ports: Some(vec![port]),
            ..ReachabilityOverrides::default()
        };
        let info = prober.reachability("127.0.0.1", &overrides).await.unwrap();
        assert_eq!(info.tcp.port, Some(port));
        assert_ne!(info.tcp.error, Some(ErrorCode::DnsFail));
    }
}

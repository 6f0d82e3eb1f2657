use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::types::{DnsInfo, TcpInfo};
use crate::error::ErrorCode;

/// Where a raw connect should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpTarget {
    Ip(IpAddr),
    /// DNS gave nothing usable; let the OS resolver try the bare name
    Host(String),
}

/// Picks the connect target: first IPv4, then (unless IPv4-only) first IPv6,
/// else the bare hostname.
pub fn pick_target(domain: &str, dns: Option<&DnsInfo>, ipv4_only: bool) -> TcpTarget {
    let Some(dns) = dns else {
        return TcpTarget::Host(domain.to_string());
    };
    if let Some(v4) = dns.ipv4_list.first() {
        return TcpTarget::Ip(IpAddr::V4(*v4));
    }
    if !ipv4_only {
        if let Some(v6) = dns.ipv6_list.first() {
            return TcpTarget::Ip(IpAddr::V6(*v6));
        }
    }
    TcpTarget::Host(domain.to_string())
}

/// Outcome of a single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortProbe {
    error: Option<ErrorCode>,
    elapsed_ms: u64,
}

async fn connect_once(target: &TcpTarget, port: u16, deadline: Duration, ipv4_only: bool) -> PortProbe {
    let start = Instant::now();

    let attempt = async {
        match target {
            TcpTarget::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, port)).await,
            TcpTarget::Host(host) => {
                let addrs = tokio::net::lookup_host((host.as_str(), port))
                    .await?
                    .filter(|addr| !ipv4_only || addr.is_ipv4())
                    .collect::<Vec<_>>();
                if addrs.is_empty() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no address to connect to",
                    ));
                }
                TcpStream::connect(addrs.as_slice()).await
            }
        }
    };

    let error = if deadline.is_zero() {
        attempt.await.err().map(|e| classify_connect_error(&e))
    } else {
        match timeout(deadline, attempt).await {
            Ok(Ok(_stream)) => None,
            Ok(Err(e)) => Some(classify_connect_error(&e)),
            Err(_) => Some(ErrorCode::TcpTimeout),
        }
    };

    PortProbe {
        error,
        elapsed_ms: start.elapsed().as_millis() as u64,
    }
}

fn classify_connect_error(error: &std::io::Error) -> ErrorCode {
    match ErrorCode::from_io(error) {
        Some(ErrorCode::Timeout) => ErrorCode::TcpTimeout,
        Some(code) => code,
        None => ErrorCode::TcpFail,
    }
}

/// Connects to each port in order, stopping at the first that accepts.
/// When all fail, the last port's error and elapsed time are reported.
pub async fn probe_tcp(
    domain: &str,
    dns: Option<&DnsInfo>,
    deadline: Duration,
    ports: &[u16],
    ipv4_only: bool,
) -> TcpInfo {
    let target = pick_target(domain, dns, ipv4_only);
    let mut last = None;

    for &port in ports {
        let probe = connect_once(&target, port, deadline, ipv4_only).await;
        if probe.error.is_none() {
            debug!(domain, port, elapsed_ms = probe.elapsed_ms, "TCP connect ok");
            return TcpInfo {
                ok: true,
                port: Some(port),
                elapsed_ms: Some(probe.elapsed_ms),
                error: None,
            };
        }
        last = Some((port, probe));
    }

    debug!(domain, ?target, "TCP connect failed on every port");
    TcpInfo {
        ok: false,
        port: last.map(|(port, _)| port),
        elapsed_ms: last.map(|(_, probe)| probe.elapsed_ms),
        error: Some(
            last.and_then(|(_, probe)| probe.error)
                .unwrap_or(ErrorCode::TcpFail),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio::net::TcpListener;

    fn dns(v4: &[Ipv4Addr], v6: &[Ipv6Addr]) -> DnsInfo {
        DnsInfo {
            ok: !v4.is_empty() || !v6.is_empty(),
            ipv4_list: v4.to_vec(),
            ipv6_list: v6.to_vec(),
            error: None,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_pick_target_prefers_ipv4() {
        let info = dns(&[Ipv4Addr::new(192, 0, 2, 1)], &[Ipv6Addr::LOCALHOST]);
        assert_eq!(
            pick_target("a.example", Some(&info), false),
            TcpTarget::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
    }

    #[test]
    fn test_pick_target_falls_back_to_ipv6_then_host() {
        let only_v6 = dns(&[], &[Ipv6Addr::LOCALHOST]);
        assert_eq!(
            pick_target("a.example", Some(&only_v6), false),
            TcpTarget::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
        assert_eq!(
            pick_target("a.example", Some(&only_v6), true),
            TcpTarget::Host("a.example".to_string())
        );
        assert_eq!(
            pick_target("a.example", None, false),
            TcpTarget::Host("a.example".to_string())
        );
    }

    #[tokio::test]
    async fn test_probe_stops_at_first_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().port()
        };

        let info = dns(&[Ipv4Addr::LOCALHOST], &[]);
        let tcp = probe_tcp("localhost", Some(&info), Duration::from_secs(2), &[closed, open], false).await;

        assert!(tcp.ok);
        assert_eq!(tcp.port, Some(open));
        assert!(tcp.error.is_none());
    }

    #[tokio::test]
    async fn test_probe_reports_last_failure() {
        let closed = {
            let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().port()
        };

        let info = dns(&[Ipv4Addr::LOCALHOST], &[]);
        let tcp = probe_tcp("localhost", Some(&info), Duration::from_secs(2), &[closed], false).await;

        assert!(!tcp.ok);
        assert_eq!(tcp.port, Some(closed));
        assert_eq!(tcp.error, Some(ErrorCode::ConnectionRefused));
        assert!(tcp.elapsed_ms.is_some());
    }
}

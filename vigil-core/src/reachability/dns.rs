use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::types::DnsInfo;
use crate::error::{ErrorCode, Result, VigilError};

/// Resolves A and AAAA records for reachability checks.
///
/// Uses the system resolver configuration unless a nameserver is given, in
/// which case every query goes to that server over UDP.
#[derive(Clone)]
pub struct DnsProber {
    resolver: TokioAsyncResolver,
}

impl std::fmt::Debug for DnsProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsProber").finish_non_exhaustive()
    }
}

impl DnsProber {
    pub fn new(nameserver: Option<&str>, timeout: Duration) -> Result<Self> {
        let (config, mut opts) = match nameserver {
            Some(ns) => {
                let ip: IpAddr = ns
                    .parse()
                    .map_err(|_| VigilError::Resolver(format!("invalid nameserver IP: {}", ns)))?;
                let mut config = ResolverConfig::new();
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
                (config, ResolverOpts::default())
            }
            None => match hickory_resolver::system_conf::read_system_conf() {
                Ok(system) => system,
                Err(e) => {
                    warn!(error = %e, "System resolver config unavailable, using public resolvers");
                    (ResolverConfig::google(), ResolverOpts::default())
                }
            },
        };

        // Outer per-family deadlines are enforced in `resolve`; keep the
        // resolver's own retry loop inside that window.
        opts.timeout = timeout;
        opts.attempts = 1;

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }

    /// Looks up IPv4 and IPv6 addresses concurrently, each bounded by
    /// `deadline`. Never fails: problems are reported through `DnsInfo::error`.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn resolve(&self, domain: &str, deadline: Duration) -> DnsInfo {
        let start = Instant::now();

        if let Ok(ip) = domain.parse::<IpAddr>() {
            let (ipv4_list, ipv6_list) = match ip {
                IpAddr::V4(v4) => (vec![v4], Vec::new()),
                IpAddr::V6(v6) => (Vec::new(), vec![v6]),
            };
            return DnsInfo {
                ok: true,
                ipv4_list,
                ipv6_list,
                error: None,
                elapsed_ms: 0,
            };
        }

        let fqdn = if domain.ends_with('.') {
            domain.to_string()
        } else {
            format!("{}.", domain)
        };

        let (v4, v6) = tokio::join!(
            timeout(deadline, self.resolver.ipv4_lookup(fqdn.as_str())),
            timeout(deadline, self.resolver.ipv6_lookup(fqdn.as_str())),
        );

        let (ipv4_list, v4_error) = match v4 {
            Ok(Ok(lookup)) => (lookup.iter().map(|a| a.0).collect(), None),
            Ok(Err(e)) => (Vec::new(), Some(classify_resolve_error(&e))),
            Err(_) => (Vec::new(), Some(ErrorCode::DnsTimeout)),
        };
        let (ipv6_list, v6_error) = match v6 {
            Ok(Ok(lookup)) => (lookup.iter().map(|aaaa| aaaa.0).collect(), None),
            Ok(Err(e)) => (Vec::new(), Some(classify_resolve_error(&e))),
            Err(_) => (Vec::new(), Some(ErrorCode::DnsTimeout)),
        };

        let ok = !ipv4_list.is_empty() || !ipv6_list.is_empty();
        let error = if ok {
            None
        } else {
            Some(most_specific(v4_error, v6_error))
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(
            ok,
            v4 = ipv4_list.len(),
            v6 = ipv6_list.len(),
            elapsed_ms,
            "DNS resolved"
        );

        DnsInfo {
            ok,
            ipv4_list,
            ipv6_list,
            error,
            elapsed_ms,
        }
    }
}

fn classify_resolve_error(error: &ResolveError) -> ErrorCode {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                ErrorCode::DnsNotFound
            } else {
                ErrorCode::DnsNoRecords
            }
        }
        ResolveErrorKind::Timeout => ErrorCode::DnsTimeout,
        _ => ErrorCode::DnsFail,
    }
}

fn specificity(code: ErrorCode) -> u8 {
    match code {
        ErrorCode::DnsNotFound => 3,
        ErrorCode::DnsNoRecords => 2,
        ErrorCode::DnsTimeout => 1,
        _ => 0,
    }
}

/// Picks the more telling of the two per-family failures.
fn most_specific(v4: Option<ErrorCode>, v6: Option<ErrorCode>) -> ErrorCode {
    match (v4, v6) {
        (Some(a), Some(b)) => {
            if specificity(b) > specificity(a) {
                b
            } else {
                a
            }
        }
        (Some(code), None) | (None, Some(code)) => code,
        (None, None) => ErrorCode::DnsNoRecords,
    }
}

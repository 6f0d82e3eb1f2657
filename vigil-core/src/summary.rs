//! Folding a result set into the summary handed to the sink, plus the
//! fuller run report printed at the end of a run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::check::DomainCheckResult;
use crate::error::ErrorCode;
use crate::schedule::RecoveryStats;

const EXPIRING_SOON_DAYS: i64 = 30;
const SLOWEST_LIMIT: usize = 10;

/// Check-level counters stored alongside every batch of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub total_domains: usize,
    pub online: usize,
    pub offline: usize,
    #[serde(rename = "withSSL")]
    pub with_ssl: usize,
    #[serde(rename = "validSSL")]
    pub valid_ssl: usize,
    /// Mean over online results, rounded; 0 when nothing is online
    pub avg_response_time_ms: u64,
}

impl CheckSummary {
    pub fn from_results(results: &[DomainCheckResult]) -> Self {
        let online: Vec<&DomainCheckResult> = results.iter().filter(|r| r.is_online()).collect();
        let with_ssl = online
            .iter()
            .filter(|r| r.ssl_info.as_ref().is_some_and(|ssl| ssl.enabled))
            .count();
        let valid_ssl = online
            .iter()
            .filter(|r| r.ssl_info.as_ref().is_some_and(|ssl| ssl.valid_by_trust_store))
            .count();
        let total_time: u64 = online.iter().filter_map(|r| r.response_time_ms).sum();
        let avg_response_time_ms = if online.is_empty() {
            0
        } else {
            (total_time as f64 / online.len() as f64).round() as u64
        };

        Self {
            total_domains: results.len(),
            online: online.len(),
            offline: results.len() - online.len(),
            with_ssl,
            valid_ssl,
            avg_response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCodeBuckets {
    #[serde(rename = "2xx")]
    pub success: usize,
    #[serde(rename = "3xx")]
    pub redirect: usize,
    #[serde(rename = "4xx")]
    pub client_error: usize,
    #[serde(rename = "5xx")]
    pub server_error: usize,
    /// No HTTP code at all, or one outside 200..600
    pub error: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    pub timeout: usize,
    pub dns: usize,
    pub reset: usize,
    pub refused: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectStats {
    pub with_redirects: usize,
    pub online_with_redirects: usize,
    pub avg_chain: f64,
    pub max_chain: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslStats {
    pub valid: usize,
    pub invalid: usize,
    pub self_signed: usize,
    pub expiring_soon: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityStats {
    pub dns_ok: usize,
    pub dns_fail: usize,
    pub tcp_ok: usize,
    pub tcp_fail: usize,
    pub reachable_but_http_failed: usize,
    pub timeout_with_tcp_ok: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePercentiles {
    pub p50: Option<u64>,
    pub p90: Option<u64>,
    pub p95: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowDomain {
    pub domain: String,
    pub response_time_ms: u64,
}

/// Everything the end-of-run report shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: CheckSummary,
    pub duration_ms: u64,
    pub throughput_per_sec: f64,
    pub http_codes: HttpCodeBuckets,
    pub errors: ErrorBreakdown,
    pub redirects: RedirectStats,
    pub ssl: SslStats,
    /// `None` when no result carries reachability data
    pub reachability: Option<ReachabilityStats>,
    pub response_times: ResponsePercentiles,
    pub slowest: Vec<SlowDomain>,
    pub second_pass: Option<RecoveryStats>,
}

impl RunReport {
    pub fn build(
        results: &[DomainCheckResult],
        elapsed: Duration,
        second_pass: Option<RecoveryStats>,
    ) -> Self {
        let summary = CheckSummary::from_results(results);
        let online: Vec<&DomainCheckResult> = results.iter().filter(|r| r.is_online()).collect();

        let secs = elapsed.as_secs_f64();
        let throughput_per_sec = if secs > 0.0 {
            results.len() as f64 / secs
        } else {
            0.0
        };

        let mut times: Vec<u64> = online.iter().filter_map(|r| r.response_time_ms).collect();
        times.sort_unstable();

        let mut slowest: Vec<SlowDomain> = online
            .iter()
            .filter_map(|r| {
                r.response_time_ms.map(|ms| SlowDomain {
                    domain: r.domain.clone(),
                    response_time_ms: ms,
                })
            })
            .collect();
        slowest.sort_by(|a, b| b.response_time_ms.cmp(&a.response_time_ms));
        slowest.truncate(SLOWEST_LIMIT);

        Self {
            summary,
            duration_ms: elapsed.as_millis() as u64,
            throughput_per_sec,
            http_codes: http_codes(results),
            errors: error_breakdown(results),
            redirects: redirect_stats(results),
            ssl: ssl_stats(&online),
            reachability: reachability_stats(results),
            response_times: ResponsePercentiles {
                p50: percentile(&times, 0.50),
                p90: percentile(&times, 0.90),
                p95: percentile(&times, 0.95),
            },
            slowest,
            second_pass,
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

fn http_codes(results: &[DomainCheckResult]) -> HttpCodeBuckets {
    let mut buckets = HttpCodeBuckets::default();
    for result in results {
        match result.http_code {
            Some(200..=299) => buckets.success += 1,
            Some(300..=399) => buckets.redirect += 1,
            Some(400..=499) => buckets.client_error += 1,
            Some(500..=599) => buckets.server_error += 1,
            _ => buckets.error += 1,
        }
    }
    buckets
}

fn error_breakdown(results: &[DomainCheckResult]) -> ErrorBreakdown {
    let mut breakdown = ErrorBreakdown::default();
    for result in results.iter().filter(|r| !r.is_online()) {
        match result.error.unwrap_or(ErrorCode::Unknown) {
            ErrorCode::Timeout => breakdown.timeout += 1,
            ErrorCode::ConnectionReset => breakdown.reset += 1,
            ErrorCode::ConnectionRefused => breakdown.refused += 1,
            code if code.is_dns() => breakdown.dns += 1,
            _ => breakdown.other += 1,
        }
    }
    breakdown
}

fn redirect_stats(results: &[DomainCheckResult]) -> RedirectStats {
    let redirected: Vec<&DomainCheckResult> = results
        .iter()
        .filter(|r| !r.redirect_chain.is_empty())
        .collect();
    if redirected.is_empty() {
        return RedirectStats::default();
    }
    let hops: usize = redirected.iter().map(|r| r.redirect_chain.len()).sum();
    RedirectStats {
        with_redirects: redirected.len(),
        online_with_redirects: redirected.iter().filter(|r| r.is_online()).count(),
        avg_chain: hops as f64 / redirected.len() as f64,
        max_chain: redirected
            .iter()
            .map(|r| r.redirect_chain.len())
            .max()
            .unwrap_or(0),
    }
}

fn ssl_stats(online: &[&DomainCheckResult]) -> SslStats {
    let mut stats = SslStats::default();
    for ssl in online.iter().filter_map(|r| r.ssl_info.as_ref()) {
        if ssl.valid_by_trust_store {
            stats.valid += 1;
        } else if ssl.enabled {
            stats.invalid += 1;
        }
        if ssl.self_signed {
            stats.self_signed += 1;
        }
        if ssl
            .days_until_expiry
            .is_some_and(|days| (0..=EXPIRING_SOON_DAYS).contains(&days))
        {
            stats.expiring_soon += 1;
        }
    }
    stats
}

fn reachability_stats(results: &[DomainCheckResult]) -> Option<ReachabilityStats> {
    let mut stats = ReachabilityStats::default();
    let mut collected = false;

    for result in results {
        let Some(reach) = &result.reachability else {
            continue;
        };
        collected = true;
        if reach.dns.ok {
            stats.dns_ok += 1;
        } else {
            stats.dns_fail += 1;
        }
        if reach.tcp.ok {
            stats.tcp_ok += 1;
        } else {
            stats.tcp_fail += 1;
        }
        if !result.is_online() && reach.dns.ok && reach.tcp.ok {
            stats.reachable_but_http_failed += 1;
            if result.error == Some(ErrorCode::Timeout) {
                stats.timeout_with_tcp_ok += 1;
            }
        }
    }

    collected.then_some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckStatus, RedirectHop};
    use crate::probe::SslInfo;
    use crate::reachability::{DnsInfo, ReachabilityInfo, TcpInfo};

    fn online(domain: &str, code: u16, ms: u64) -> DomainCheckResult {
        let mut result = DomainCheckResult::offline(domain, ErrorCode::Unknown, None);
        result.status = CheckStatus::Online;
        result.error = None;
        result.http_code = Some(code);
        result.response_time_ms = Some(ms);
        result
    }

    fn ssl(valid: bool, self_signed: bool, days: i64) -> SslInfo {
        SslInfo {
            enabled: true,
            valid_by_trust_store: valid,
            issuer: "Issuer".to_string(),
            subject: "subject".to_string(),
            valid_from: None,
            valid_to: None,
            days_until_expiry: Some(days),
            self_signed,
        }
    }

    fn reach(dns_ok: bool, tcp_ok: bool) -> ReachabilityInfo {
        ReachabilityInfo {
            dns: DnsInfo {
                ok: dns_ok,
                ipv4_list: Vec::new(),
                ipv6_list: Vec::new(),
                error: None,
                elapsed_ms: 1,
            },
            tcp: TcpInfo {
                ok: tcp_ok,
                port: Some(443),
                elapsed_ms: Some(1),
                error: None,
            },
        }
    }

    fn sample() -> Vec<DomainCheckResult> {
        let mut a = online("a.example", 200, 100);
        a.ssl_info = Some(ssl(true, false, 90));
        let mut b = online("b.example", 301, 301);
        b.ssl_info = Some(ssl(false, true, 10));
        b.redirect_chain = vec![
            RedirectHop {
                url: "https://b.example".to_string(),
                status_code: 301,
            },
            RedirectHop {
                url: "https://www.b.example".to_string(),
                status_code: 302,
            },
        ];
        let c = DomainCheckResult::offline("c.example", ErrorCode::Timeout, Some(reach(true, true)));
        let d = DomainCheckResult::offline("d.example", ErrorCode::DnsNotFound, Some(reach(false, false)));
        let e = DomainCheckResult::offline("e.example", ErrorCode::ConnectionRefused, None);
        vec![a, b, c, d, e]
    }

    #[test]
    fn test_summary_counts_online_only_for_ssl_and_timing() {
        let summary = CheckSummary::from_results(&sample());
        assert_eq!(summary.total_domains, 5);
        assert_eq!(summary.online, 2);
        assert_eq!(summary.offline, 3);
        assert_eq!(summary.with_ssl, 2);
        assert_eq!(summary.valid_ssl, 1);
        // (100 + 301) / 2 = 200.5
        assert_eq!(summary.avg_response_time_ms, 201);

        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["withSSL"], 2);
        assert_eq!(json["avgResponseTimeMs"], 201);
    }

    #[test]
    fn test_empty_summary() {
        let summary = CheckSummary::from_results(&[]);
        assert_eq!(summary, CheckSummary::default());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let times = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
        assert_eq!(percentile(&times, 0.5), Some(50));
        assert_eq!(percentile(&times, 0.9), Some(90));
        assert_eq!(percentile(&times, 0.95), Some(100));
        assert_eq!(percentile(&[7], 0.5), Some(7));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_report_breakdowns() {
        let report = RunReport::build(&sample(), Duration::from_secs(2), None);

        assert_eq!(report.http_codes.success, 1);
        assert_eq!(report.http_codes.redirect, 1);
        assert_eq!(report.http_codes.error, 3);

        assert_eq!(report.errors.timeout, 1);
        assert_eq!(report.errors.dns, 1);
        assert_eq!(report.errors.refused, 1);
        assert_eq!(report.errors.other, 0);

        assert_eq!(report.redirects.with_redirects, 1);
        assert_eq!(report.redirects.max_chain, 2);
        assert!((report.redirects.avg_chain - 2.0).abs() < f64::EPSILON);

        assert_eq!(report.ssl.valid, 1);
        assert_eq!(report.ssl.invalid, 1);
        assert_eq!(report.ssl.self_signed, 1);
        assert_eq!(report.ssl.expiring_soon, 1);

        let reach = report.reachability.unwrap();
        assert_eq!(reach.dns_ok, 1);
        assert_eq!(reach.dns_fail, 1);
        assert_eq!(reach.reachable_but_http_failed, 1);
        assert_eq!(reach.timeout_with_tcp_ok, 1);

        assert_eq!(report.slowest[0].domain, "b.example");
        assert!((report.throughput_per_sec - 2.5).abs() < f64::EPSILON);
    }
}

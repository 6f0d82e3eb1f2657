use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::types::{
    CheckOptions, CheckOutcome, CheckStatus, DomainCheckResult, DomainChecker, RedirectHop,
};
use crate::config::CheckConfig;
use crate::error::ErrorCode;
use crate::probe::{HttpProbe, ProbeRequest, ProbeResponse, ProbeResult, RequestMethod, SslInfo};
use crate::reachability::{ReachabilityInfo, ReachabilityProbe};
use crate::retry::{Attempt, NetworkRetryClassifier, RetryExecutor, RetryPolicy};

/// Status codes servers use to refuse HEAD; the same URL is re-asked with GET.
const HEAD_REJECTED: [u16; 3] = [403, 405, 501];

/// Runs full per-domain checks: DNS gate, HTTPS attempt, HTTP fallback,
/// redirect following, all under the retry policy.
#[derive(Debug, Clone)]
pub struct DomainCheckOrchestrator<H, R> {
    http: H,
    reach: R,
    method: RequestMethod,
    timeout: Duration,
    max_redirects: usize,
    retry: RetryPolicy,
    classifier: NetworkRetryClassifier,
}

/// Progress of a single walk through the check.
#[derive(Debug)]
enum CheckState {
    Start,
    ReachabilityGate,
    Attempt {
        url: String,
        hop: usize,
        /// Only the very first request may fall back to plain HTTP
        may_fall_back: bool,
    },
    Online {
        response: ProbeResponse,
        final_url: Option<String>,
    },
    Offline(ErrorCode),
}

/// How one walk ended, as seen by the retry loop.
#[derive(Debug)]
enum Pass {
    Done(DomainCheckResult),
    /// Stopped at the DNS gate; retrying would reuse the same reachability
    GateRejected(DomainCheckResult),
    Demoted,
}

impl Attempt for Pass {
    fn failure(&self) -> Option<ErrorCode> {
        match self {
            Pass::Done(result) if !result.is_online() => result.error,
            _ => None,
        }
    }
}

impl<H: HttpProbe, R: ReachabilityProbe> DomainCheckOrchestrator<H, R> {
    pub fn new(http: H, reach: R, config: &CheckConfig) -> Self {
        Self {
            http,
            reach,
            method: config.request_method,
            timeout: config.request_timeout(),
            max_redirects: config.max_redirects,
            retry: RetryPolicy::new()
                .with_max_retries(config.retry_attempts)
                .with_backoff_unit(config.retry_backoff()),
            classifier: NetworkRetryClassifier::new().skip_dns_retries(config.skip_dns_retries),
        }
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn reach(&self) -> &R {
        &self.reach
    }

    /// Checks one domain. Never fails: network problems become offline results.
    #[instrument(skip(self, options), fields(domain = %domain))]
    pub async fn run(&self, domain: &str, options: CheckOptions) -> CheckOutcome {
        let cancel = options.cancel.as_ref();

        let reachability = match options.reachability {
            Some(info) => Some(info),
            None => {
                let lookup = self
                    .reach
                    .reachability(domain, &options.reachability_overrides);
                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                debug!("Demoted during reachability");
                                return CheckOutcome::Demoted { reachability: None };
                            }
                            info = lookup => info,
                        }
                    }
                    None => lookup.await,
                }
            }
        };

        let timeout = options.timeout.unwrap_or(self.timeout);
        let policy = match options.retries {
            Some(retries) => self.retry.clone().with_max_retries(retries),
            None => self.retry.clone(),
        };
        let executor = RetryExecutor::with_classifier(policy, &self.classifier);

        let known = reachability.as_ref();
        let pass = executor
            .execute(move |attempt| self.walk(domain, known, timeout, cancel, attempt))
            .await;

        match pass {
            Pass::Done(mut result) | Pass::GateRejected(mut result) => {
                result.reachability = reachability;
                CheckOutcome::Finished(result)
            }
            Pass::Demoted => CheckOutcome::Demoted { reachability },
        }
    }

    async fn walk(
        &self,
        domain: &str,
        reachability: Option<&ReachabilityInfo>,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
        attempt: u32,
    ) -> Pass {
        let mut chain: Vec<RedirectHop> = Vec::new();
        let mut ssl: Option<SslInfo> = None;
        let mut state = CheckState::Start;

        loop {
            state = match state {
                CheckState::Start => CheckState::ReachabilityGate,

                CheckState::ReachabilityGate => {
                    if let Some(info) = reachability.filter(|_| self.reach.enabled()) {
                        if !info.dns.ok {
                            debug!(error = %info.dns.failure(), "Rejected at DNS gate");
                            return Pass::GateRejected(DomainCheckResult::offline(
                                domain,
                                info.dns.failure(),
                                None,
                            ));
                        }
                    }
                    CheckState::Attempt {
                        url: format!("https://{}", domain),
                        hop: 0,
                        may_fall_back: true,
                    }
                }

                CheckState::Attempt {
                    url,
                    hop,
                    may_fall_back,
                } => match self.request(&url, timeout, cancel).await {
                    Err(ErrorCode::Demote) => return Pass::Demoted,
                    Err(code) if may_fall_back => {
                        debug!(attempt, error = %code, "HTTPS failed, falling back to HTTP");
                        ssl = None;
                        CheckState::Attempt {
                            url: format!("http://{}", domain),
                            hop,
                            may_fall_back: false,
                        }
                    }
                    Err(code) => CheckState::Offline(code),
                    Ok(response) => {
                        if response.ssl.is_some() {
                            ssl = response.ssl.clone();
                        }
                        let location = response
                            .redirect_location
                            .clone()
                            .filter(|_| response.is_redirect());
                        match location {
                            Some(location) => {
                                chain.push(RedirectHop {
                                    url,
                                    status_code: response.http_code,
                                });
                                if hop < self.max_redirects {
                                    CheckState::Attempt {
                                        url: location,
                                        hop: hop + 1,
                                        may_fall_back: false,
                                    }
                                } else {
                                    debug!(hops = chain.len(), "Redirect limit reached");
                                    CheckState::Online {
                                        response,
                                        final_url: Some(location),
                                    }
                                }
                            }
                            None => CheckState::Online {
                                response,
                                final_url: (!chain.is_empty()).then_some(url),
                            },
                        }
                    }
                },

                CheckState::Online {
                    response,
                    final_url,
                } => {
                    return Pass::Done(DomainCheckResult {
                        domain: domain.to_string(),
                        status: CheckStatus::Online,
                        http_code: Some(response.http_code),
                        response_time_ms: Some(response.response_time_ms),
                        ssl_info: ssl,
                        headers: Some(response.headers),
                        redirect_chain: chain,
                        final_url,
                        error: None,
                        checked_at: Utc::now(),
                        reachability: None,
                    });
                }

                CheckState::Offline(code) => {
                    return Pass::Done(DomainCheckResult::offline(domain, code, None));
                }
            };
        }
    }

    /// One attempt at `url`, re-asked with GET when a HEAD is refused.
    async fn request(
        &self,
        url: &str,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> ProbeResult {
        let request = ProbeRequest::new(url, self.method, timeout).with_cancel(cancel);
        let response = self.http.request(request).await?;

        if self.method == RequestMethod::Head && HEAD_REJECTED.contains(&response.http_code) {
            debug!(http_code = response.http_code, "HEAD refused, repeating with GET");
            return self
                .http
                .request(ProbeRequest {
                    method: RequestMethod::Get,
                    ..request
                })
                .await;
        }

        Ok(response)
    }
}

impl<H, R> DomainChecker for DomainCheckOrchestrator<H, R>
where
    H: HttpProbe + 'static,
    R: ReachabilityProbe + 'static,
{
    fn check(
        &self,
        domain: &str,
        options: CheckOptions,
    ) -> impl Future<Output = CheckOutcome> + Send {
        self.run(domain, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::HeaderSummary;
    use crate::reachability::{DnsInfo, ReachabilityOverrides, TcpInfo};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeHttp<F> {
        handler: F,
        calls: Mutex<Vec<(String, RequestMethod)>>,
    }

    impl<F> FakeHttp<F>
    where
        F: Fn(&str, RequestMethod) -> ProbeResult + Send + Sync,
    {
        fn new(handler: F) -> Self {
            Self {
                handler,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, RequestMethod)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<F> HttpProbe for FakeHttp<F>
    where
        F: Fn(&str, RequestMethod) -> ProbeResult + Send + Sync,
    {
        fn request(&self, request: ProbeRequest<'_>) -> impl Future<Output = ProbeResult> + Send {
            self.calls
                .lock()
                .unwrap()
                .push((request.url.to_string(), request.method));
            let result = (self.handler)(request.url, request.method);
            async move { result }
        }
    }

    struct FakeReach {
        info: Option<ReachabilityInfo>,
        hang: bool,
        calls: AtomicUsize,
    }

    impl FakeReach {
        fn with(info: Option<ReachabilityInfo>) -> Self {
            Self {
                info,
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ReachabilityProbe for FakeReach {
        fn enabled(&self) -> bool {
            true
        }

        fn reachability(
            &self,
            _domain: &str,
            _overrides: &ReachabilityOverrides,
        ) -> impl Future<Output = Option<ReachabilityInfo>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let info = self.info.clone();
            let hang = self.hang;
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                info
            }
        }
    }

    fn resolved() -> ReachabilityInfo {
        ReachabilityInfo {
            dns: DnsInfo {
                ok: true,
                ipv4_list: vec![Ipv4Addr::new(192, 0, 2, 10)],
                ipv6_list: Vec::new(),
                error: None,
                elapsed_ms: 3,
            },
            tcp: TcpInfo {
                ok: true,
                port: Some(443),
                elapsed_ms: Some(4),
                error: None,
            },
        }
    }

    fn unresolved() -> ReachabilityInfo {
        ReachabilityInfo {
            dns: DnsInfo {
                ok: false,
                ipv4_list: Vec::new(),
                ipv6_list: Vec::new(),
                error: None,
                elapsed_ms: 3,
            },
            tcp: TcpInfo::skipped_dns_failed(),
        }
    }

    fn ok(code: u16) -> ProbeResult {
        Ok(ProbeResponse {
            http_code: code,
            response_time_ms: 12,
            headers: HeaderSummary {
                server: Some("fake".to_string()),
                ..HeaderSummary::default()
            },
            redirect_location: None,
            ssl: None,
        })
    }

    fn redirect(code: u16, location: &str) -> ProbeResult {
        Ok(ProbeResponse {
            http_code: code,
            response_time_ms: 8,
            headers: HeaderSummary::default(),
            redirect_location: Some(location.to_string()),
            ssl: None,
        })
    }

    fn finished(outcome: CheckOutcome) -> DomainCheckResult {
        match outcome {
            CheckOutcome::Finished(result) => result,
            other => panic!("expected a finished check, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_200_is_idempotent() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| ok(200));
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &CheckConfig::default());

        let first = finished(orchestrator.run("a.example", CheckOptions::default()).await);
        let second = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        for result in [&first, &second] {
            assert_eq!(result.status, CheckStatus::Online);
            assert!(result.redirect_chain.is_empty());
            assert!(result.final_url.is_none());
            assert!(result.error.is_none());
        }
        assert_eq!(first.http_code, second.http_code);
        assert_eq!(first.ssl_info, second.ssl_info);
        assert_eq!(first.headers, second.headers);
        assert_eq!(first.reachability, Some(resolved()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_makes_three_attempts() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| Err(ErrorCode::Timeout));
        let config = CheckConfig {
            retry_attempts: 2,
            ..CheckConfig::default()
        };
        let orchestrator = DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &config);

        let result = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        assert_eq!(result.status, CheckStatus::Offline);
        assert_eq!(result.error, Some(ErrorCode::Timeout));
        let https_attempts = orchestrator
            .http()
            .calls()
            .iter()
            .filter(|(url, _)| url == "https://a.example")
            .count();
        assert_eq!(https_attempts, 3);
        // reachability is computed once, not per retry
        assert_eq!(orchestrator.reach().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_final() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| Err(ErrorCode::InvalidUrl));
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &CheckConfig::default());

        let result = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        assert_eq!(result.error, Some(ErrorCode::InvalidUrl));
        // https attempt plus its http fallback, no retries
        assert_eq!(orchestrator.http().calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_chain() {
        let http = FakeHttp::new(|url: &str, _: RequestMethod| match url {
            "https://a.example" => redirect(301, "https://b.example"),
            "https://b.example" => ok(200),
            _ => Err(ErrorCode::ConnectionRefused),
        });
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &CheckConfig::default());

        let result = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        assert_eq!(result.status, CheckStatus::Online);
        assert_eq!(
            result.redirect_chain,
            vec![RedirectHop {
                url: "https://a.example".to_string(),
                status_code: 301,
            }]
        );
        assert_eq!(result.final_url.as_deref(), Some("https://b.example"));
        assert_eq!(result.http_code, Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_gate_skips_http() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| ok(200));
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(unresolved())), &CheckConfig::default());

        let result = finished(orchestrator.run("gone.example", CheckOptions::default()).await);

        assert_eq!(result.status, CheckStatus::Offline);
        assert_eq!(result.error, Some(ErrorCode::DnsFail));
        assert!(orchestrator.http().calls().is_empty());
        assert_eq!(result.reachability.unwrap().tcp, TcpInfo::skipped_dns_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_head_is_reissued_as_get() {
        let http = FakeHttp::new(|_: &str, method: RequestMethod| match method {
            RequestMethod::Head => ok(405),
            RequestMethod::Get => ok(200),
        });
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &CheckConfig::default());

        let result = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        assert_eq!(result.http_code, Some(200));
        assert_eq!(
            orchestrator.http().calls(),
            vec![
                ("https://a.example".to_string(), RequestMethod::Head),
                ("https://a.example".to_string(), RequestMethod::Get),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_https_failure_falls_back_to_http() {
        let http = FakeHttp::new(|url: &str, _: RequestMethod| {
            if url.starts_with("https://") {
                Err(ErrorCode::ConnectionRefused)
            } else {
                ok(200)
            }
        });
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &CheckConfig::default());

        let result = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        assert_eq!(result.status, CheckStatus::Online);
        assert!(result.ssl_info.is_none());
        assert_eq!(orchestrator.http().calls()[1].0, "http://a.example");
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_loop_is_bounded() {
        let http = FakeHttp::new(|url: &str, _: RequestMethod| redirect(302, &format!("{}/x", url)));
        let config = CheckConfig {
            max_redirects: 3,
            ..CheckConfig::default()
        };
        let orchestrator = DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &config);

        let result = finished(orchestrator.run("a.example", CheckOptions::default()).await);

        assert_eq!(orchestrator.http().calls().len(), 4);
        assert_eq!(result.status, CheckStatus::Online);
        assert_eq!(result.http_code, Some(302));
        assert_eq!(result.redirect_chain.len(), 4);
        assert_eq!(result.final_url.as_deref(), Some("https://a.example/x/x/x/x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_demotion_carries_reachability() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| Err(ErrorCode::Demote));
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(Some(resolved())), &CheckConfig::default());

        let outcome = orchestrator.run("a.example", CheckOptions::default()).await;

        assert_eq!(
            outcome,
            CheckOutcome::Demoted {
                reachability: Some(resolved())
            }
        );
        // demotion is neither retried nor a reason to fall back
        assert_eq!(orchestrator.http().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_reachability_discards_it() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| ok(200));
        let reach = FakeReach {
            info: Some(resolved()),
            hang: true,
            calls: AtomicUsize::new(0),
        };
        let orchestrator = DomainCheckOrchestrator::new(http, reach, &CheckConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orchestrator
            .run(
                "a.example",
                CheckOptions {
                    cancel: Some(cancel),
                    ..CheckOptions::default()
                },
            )
            .await;

        assert_eq!(outcome, CheckOutcome::Demoted { reachability: None });
        assert!(orchestrator.http().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_precomputed_reachability_is_reused() {
        let http = FakeHttp::new(|_: &str, _: RequestMethod| ok(204));
        let orchestrator =
            DomainCheckOrchestrator::new(http, FakeReach::with(None), &CheckConfig::default());

        let result = finished(
            orchestrator
                .run(
                    "a.example",
                    CheckOptions {
                        reachability: Some(resolved()),
                        ..CheckOptions::default()
                    },
                )
                .await,
        );

        assert_eq!(orchestrator.reach().calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.reachability, Some(resolved()));
        assert_eq!(result.http_code, Some(204));
    }
}

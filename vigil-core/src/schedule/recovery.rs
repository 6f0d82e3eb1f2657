use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::check::{CheckOptions, CheckOutcome, DomainCheckResult, DomainChecker};
use crate::config::CheckConfig;
use crate::error::ErrorCode;
use crate::reachability::ReachabilityOverrides;

/// Callback for recovery progress: (completed, total, latest result)
pub type RecoveryCallback = Box<dyn Fn(usize, usize, &DomainCheckResult) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub total: usize,
    pub recovered: usize,
    pub still_offline: usize,
    pub duration_ms: u64,
}

/// Flat bounded-concurrency recheck of the domains left offline.
pub struct RecoveryScheduler<C> {
    checker: Arc<C>,
    concurrency: usize,
    timeout: Duration,
    retries: u32,
    overrides: ReachabilityOverrides,
}

impl<C: DomainChecker> RecoveryScheduler<C> {
    pub fn new(checker: Arc<C>, config: &CheckConfig) -> Self {
        let second = &config.second_pass;
        Self {
            checker,
            concurrency: second.concurrency.max(1),
            timeout: Duration::from_millis(second.timeout_ms),
            retries: config.second_pass_retries(),
            overrides: ReachabilityOverrides {
                dns_timeout: Some(Duration::from_millis(second.dns_timeout_ms)),
                tcp_timeout: Some(Duration::from_millis(second.tcp_timeout_ms)),
                tcp_ports: None,
            },
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Rechecks every offline entry of `results` in place. Online entries are
    /// never touched; an entry is replaced only while it is still offline.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run(
        &self,
        results: &mut [DomainCheckResult],
        progress: Option<RecoveryCallback>,
    ) -> RecoveryStats {
        let start = Instant::now();
        let targets: Vec<(usize, String)> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| !result.is_online())
            .map(|(index, result)| (index, result.domain.clone()))
            .collect();
        let total = targets.len();
        if total == 0 {
            return RecoveryStats::default();
        }
        info!(total, "Second pass started");

        let mut checks = stream::iter(targets)
            .map(|(index, domain)| async move {
                let result = self.recheck(&domain).await;
                (index, result)
            })
            .buffer_unordered(self.concurrency);

        let mut stats = RecoveryStats {
            total,
            ..RecoveryStats::default()
        };
        let mut done = 0;

        while let Some((index, result)) = checks.next().await {
            done += 1;
            if result.is_online() {
                stats.recovered += 1;
            } else {
                stats.still_offline += 1;
            }
            if let Some(callback) = &progress {
                callback(done, total, &result);
            }
            if let Some(slot) = results.get_mut(index) {
                if !slot.is_online() {
                    *slot = result;
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            recovered = stats.recovered,
            still_offline = stats.still_offline,
            duration_ms = stats.duration_ms,
            "Second pass finished"
        );
        stats
    }

    async fn recheck(&self, domain: &str) -> DomainCheckResult {
        let options = CheckOptions {
            timeout: Some(self.timeout),
            retries: Some(self.retries),
            reachability: None,
            reachability_overrides: self.overrides.clone(),
            cancel: None,
        };
        let caught = AssertUnwindSafe(self.checker.check(domain, options))
            .catch_unwind()
            .await;
        match caught {
            Ok(CheckOutcome::Finished(result)) => result,
            Ok(CheckOutcome::Demoted { reachability }) => {
                warn!(domain, "Second-pass check reported demotion");
                DomainCheckResult::offline(domain, ErrorCode::Unknown, reachability)
            }
            Err(_) => {
                warn!(domain, "Second-pass check panicked");
                DomainCheckResult::offline(domain, ErrorCode::Unknown, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use chrono::Utc;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Recovers every domain whose name starts with "flaky".
    struct Recovering {
        seen: Mutex<Vec<(String, Option<Duration>, Option<u32>, ReachabilityOverrides)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Recovering {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl DomainChecker for Recovering {
        fn check(
            &self,
            domain: &str,
            options: CheckOptions,
        ) -> impl Future<Output = CheckOutcome> + Send {
            self.seen.lock().unwrap().push((
                domain.to_string(),
                options.timeout,
                options.retries,
                options.reachability_overrides.clone(),
            ));
            let domain = domain.to_string();
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if domain.starts_with("flaky") {
                    let mut result = DomainCheckResult::offline(domain, ErrorCode::Unknown, None);
                    result.status = CheckStatus::Online;
                    result.error = None;
                    result.http_code = Some(200);
                    result.checked_at = Utc::now();
                    CheckOutcome::Finished(result)
                } else {
                    CheckOutcome::Finished(DomainCheckResult::offline(
                        domain,
                        ErrorCode::ConnectionRefused,
                        None,
                    ))
                }
            }
        }
    }

    fn online(domain: &str) -> DomainCheckResult {
        let mut result = DomainCheckResult::offline(domain, ErrorCode::Unknown, None);
        result.status = CheckStatus::Online;
        result.error = None;
        result.http_code = Some(200);
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_offline_entries_are_rechecked() {
        let checker = Arc::new(Recovering::new());
        let config = CheckConfig::default();
        let scheduler = RecoveryScheduler::new(Arc::clone(&checker), &config);

        let mut results = vec![
            online("up.example"),
            DomainCheckResult::offline("flaky.example", ErrorCode::Timeout, None),
            DomainCheckResult::offline("down.example", ErrorCode::Timeout, None),
        ];

        let stats = scheduler.run(&mut results, None).await;

        assert_eq!(stats.total, 2);
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.still_offline, 1);
        assert!(results[0].is_online());
        assert!(results[1].is_online());
        assert_eq!(results[2].error, Some(ErrorCode::ConnectionRefused));

        let seen = checker.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(domain, ..)| domain != "up.example"));
        let (_, timeout, retries, overrides) = &seen[0];
        assert_eq!(*timeout, Some(Duration::from_millis(45_000)));
        assert_eq!(*retries, Some(2));
        assert_eq!(overrides.dns_timeout, Some(Duration::from_millis(8_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let checker = Arc::new(Recovering::new());
        let scheduler =
            RecoveryScheduler::new(Arc::clone(&checker), &CheckConfig::default()).with_concurrency(3);
        let mut results: Vec<DomainCheckResult> = (0..12)
            .map(|i| DomainCheckResult::offline(format!("d{}.example", i), ErrorCode::Timeout, None))
            .collect();

        let progress = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&progress);
        let stats = scheduler
            .run(
                &mut results,
                Some(Box::new(move |done: usize, total: usize, _: &DomainCheckResult| {
                    assert!(done <= total);
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .await;

        assert_eq!(stats.total, 12);
        assert_eq!(progress.load(Ordering::SeqCst), 12);
        assert_eq!(checker.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_offline_is_a_no_op() {
        let checker = Arc::new(Recovering::new());
        let scheduler = RecoveryScheduler::new(Arc::clone(&checker), &CheckConfig::default());
        let mut results = vec![online("up.example")];

        let stats = scheduler.run(&mut results, None).await;

        assert_eq!(stats, RecoveryStats::default());
        assert!(checker.seen.lock().unwrap().is_empty());
    }
}

//! Retry logic with linear backoff for transient check failures.
//!
//! A check is retried only when it ended offline with a code the classifier
//! considers transient. Retry `n` (1-based) waits `n * backoff_unit` first.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::ErrorCode;

/// Configuration for retry behavior with linear backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 disables retrying).
    pub max_retries: u32,
    /// Delay multiplied by the retry number before each retry.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_unit: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff_unit.saturating_mul(retry)
    }
}

/// Trait for classifying whether a failure code is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, code: ErrorCode) -> bool;
}

/// Default classifier for domain checks.
///
/// Retryable: request timeouts, connection reset/refused and the DNS class
/// (unless DNS retries are switched off). Everything else, including the
/// internal demotion signal, is final.
#[derive(Debug, Clone, Default)]
pub struct NetworkRetryClassifier {
    skip_dns: bool,
}

impl NetworkRetryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_dns_retries(mut self, skip: bool) -> Self {
        self.skip_dns = skip;
        self
    }
}

impl RetryClassifier for NetworkRetryClassifier {
    fn is_retryable(&self, code: ErrorCode) -> bool {
        match code {
            ErrorCode::Timeout | ErrorCode::ConnectionReset | ErrorCode::ConnectionRefused => true,
            code if code.is_dns() => !self.skip_dns,
            _ => false,
        }
    }
}

impl<C: RetryClassifier + ?Sized> RetryClassifier for &C {
    fn is_retryable(&self, code: ErrorCode) -> bool {
        (**self).is_retryable(code)
    }
}

/// Outcome of one attempt as seen by the retry loop.
pub trait Attempt {
    /// The failure to classify, or `None` when the outcome is final as-is
    /// (success, demotion, or a failure that must not be retried).
    fn failure(&self) -> Option<ErrorCode>;
}

/// Executes attempts with retry logic using linear backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor<C: RetryClassifier> {
    policy: RetryPolicy,
    classifier: C,
}

impl RetryExecutor<NetworkRetryClassifier> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: NetworkRetryClassifier::new(),
        }
    }
}

impl<C: RetryClassifier> RetryExecutor<C> {
    pub fn with_classifier(policy: RetryPolicy, classifier: C) -> Self {
        Self { policy, classifier }
    }

    /// Runs `operation` until it yields a final outcome or the retry budget
    /// is spent. The last outcome is returned either way.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> T
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        T: Attempt,
    {
        let mut outcome = operation(0).await;

        for retry in 1..=self.policy.max_retries {
            let Some(code) = outcome.failure() else {
                break;
            };
            if !self.classifier.is_retryable(code) {
                break;
            }

            let delay = self.policy.delay_for_retry(retry);
            debug!(
                retry,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %code,
                "Retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            outcome = operation(retry).await;
        }

        outcome
    }
}

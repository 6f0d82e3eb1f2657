use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::probe::{HeaderSummary, SslInfo};
use crate::reachability::{ReachabilityInfo, ReachabilityOverrides};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Online,
    Offline,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Online => write!(f, "online"),
            CheckStatus::Offline => write!(f, "offline"),
        }
    }
}

/// One followed redirect: the URL requested and the 3xx it answered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectHop {
    pub url: String,
    pub status_code: u16,
}

/// The per-domain outcome of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCheckResult {
    pub domain: String,
    pub status: CheckStatus,
    pub http_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub ssl_info: Option<SslInfo>,
    pub headers: Option<HeaderSummary>,
    pub redirect_chain: Vec<RedirectHop>,
    /// Set only when at least one redirect was followed
    pub final_url: Option<String>,
    pub error: Option<ErrorCode>,
    pub checked_at: DateTime<Utc>,
    pub reachability: Option<ReachabilityInfo>,
}

impl DomainCheckResult {
    /// An offline result carrying only the failure code.
    pub fn offline(
        domain: impl Into<String>,
        error: ErrorCode,
        reachability: Option<ReachabilityInfo>,
    ) -> Self {
        Self {
            domain: domain.into(),
            status: CheckStatus::Offline,
            http_code: None,
            response_time_ms: None,
            ssl_info: None,
            headers: None,
            redirect_chain: Vec::new(),
            final_url: None,
            error: Some(error),
            checked_at: Utc::now(),
            reachability,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == CheckStatus::Online
    }
}

/// What a check hands back to its scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Finished(DomainCheckResult),
    /// Cancelled for lane demotion; not a failure. Any reachability computed
    /// before the cancellation is carried along for reuse.
    Demoted {
        reachability: Option<ReachabilityInfo>,
    },
}

impl CheckOutcome {
    pub fn into_result(self) -> Option<DomainCheckResult> {
        match self {
            CheckOutcome::Finished(result) => Some(result),
            CheckOutcome::Demoted { .. } => None,
        }
    }
}

/// Per-call knobs layered over the orchestrator's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Previously computed reachability; skips recomputation when set
    pub reachability: Option<ReachabilityInfo>,
    pub reachability_overrides: ReachabilityOverrides,
    /// Demotion signal from the fast lane
    pub cancel: Option<CancellationToken>,
}

/// Anything that can run a full check for one domain.
pub trait DomainChecker: Send + Sync + 'static {
    fn check(
        &self,
        domain: &str,
        options: CheckOptions,
    ) -> impl Future<Output = CheckOutcome> + Send;
}

pub mod check;
pub mod colors;
pub mod config;
pub mod error;
pub mod loader;
pub mod output;
pub mod probe;
pub mod reachability;
pub mod retry;
pub mod schedule;
pub mod sink;
pub mod summary;

pub use error::{ErrorCode, Result, VigilError};
pub use config::CheckConfig;
pub use loader::{load_domains, normalize_domain, parse_domain_list};

pub use check::{
    CheckOptions, CheckOutcome, CheckStatus, DomainCheckOrchestrator, DomainCheckResult,
    DomainChecker, RedirectHop,
};
pub use probe::{HttpProbe, HttpProbeEngine, ProbeRequest, ProbeResponse, RequestMethod, SslInfo};
pub use reachability::{ReachabilityInfo, ReachabilityOverrides, ReachabilityProbe, ReachabilityProber};
pub use retry::{RetryExecutor, RetryPolicy};
pub use schedule::{LaneScheduler, RecoveryScheduler, RecoveryStats, SchedulerEvent};

pub use output::{OutputFormat, OutputFormatter};
pub use sink::{CheckRecord, JsonFileSink, StorageSink};
pub use summary::{CheckSummary, RunReport};

/// The orchestrator wired to the real network probes.
pub type LiveChecker = DomainCheckOrchestrator<HttpProbeEngine, ReachabilityProber>;

/// Builds a [`LiveChecker`] from one configuration.
pub fn live_checker(config: &CheckConfig) -> Result<LiveChecker> {
    let http = HttpProbeEngine::new(config)?;
    let reach = ReachabilityProber::new(config)?;
    Ok(DomainCheckOrchestrator::new(http, reach, config))
}

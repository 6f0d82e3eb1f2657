//! Per-domain check orchestration.

mod orchestrator;
mod types;

pub use orchestrator::DomainCheckOrchestrator;
pub use types::{
    CheckOptions, CheckOutcome, CheckStatus, DomainCheckResult, DomainChecker, RedirectHop,
};

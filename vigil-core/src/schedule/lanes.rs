use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{Lane, LaneItem, LaneLimits, RampChange, SchedulerState};
use crate::check::{CheckOptions, CheckOutcome, DomainCheckResult, DomainChecker};
use crate::config::{CheckConfig, RampConfig};
use crate::error::ErrorCode;
use crate::reachability::ReachabilityInfo;

/// What the scheduler reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent<'a> {
    /// Emitted once, before any check starts
    Lanes {
        limits: LaneLimits,
        fast_timeout_ms: u64,
        total: usize,
    },
    Started {
        domain: &'a str,
        lane: Lane,
        /// Set for items that were demoted earlier
        requeued: bool,
        in_flight_fast: usize,
        fast_limit: usize,
        in_flight_slow: usize,
        slow_limit: usize,
        slow_queued: usize,
    },
    Completed {
        index: usize,
        result: &'a DomainCheckResult,
        done: usize,
        total: usize,
    },
    Demoted {
        domain: &'a str,
        fast_timeout_ms: u64,
    },
    Ramp(RampChange),
}

pub type EventCallback = Box<dyn Fn(&SchedulerEvent<'_>) + Send + Sync>;

/// Two-lane scheduler for the main pass.
///
/// Every domain starts on the fast lane under a short deadline; checks still
/// running at the deadline are cancelled and moved to the slow queue when
/// other fast work is waiting. The slow lane is resized on a fixed interval
/// according to the recent timeout rate.
pub struct LaneScheduler<C> {
    checker: Arc<C>,
    limits: LaneLimits,
    fast_timeout: Duration,
    ramp: RampConfig,
    on_event: Option<EventCallback>,
}

struct TaskDone {
    lane: Lane,
    item: LaneItem,
    armed: bool,
    outcome: CheckOutcome,
}

impl<C: DomainChecker> LaneScheduler<C> {
    pub fn new(checker: Arc<C>, config: &CheckConfig) -> Self {
        Self {
            checker,
            limits: LaneLimits::from_config(config),
            fast_timeout: config.fast_timeout(),
            ramp: config.ramp.clone(),
            on_event: None,
        }
    }

    pub fn with_events(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    pub fn limits(&self) -> LaneLimits {
        self.limits
    }

    fn emit(&self, event: SchedulerEvent<'_>) {
        if let Some(callback) = &self.on_event {
            callback(&event);
        }
    }

    /// Checks every domain and returns one result per input, in input order.
    pub async fn run(&self, domains: &[String]) -> Vec<DomainCheckResult> {
        let total = domains.len();
        let mut results: Vec<Option<DomainCheckResult>> = vec![None; total];
        let mut state = SchedulerState::new(domains, self.limits);
        let mut tasks: JoinSet<TaskDone> = JoinSet::new();
        let fast_timeout_ms = self.fast_timeout.as_millis() as u64;

        info!(
            fast = self.limits.fast,
            slow = self.limits.slow,
            max_slow = self.limits.max_slow,
            fast_timeout_ms,
            total,
            "Lanes configured"
        );
        self.emit(SchedulerEvent::Lanes {
            limits: self.limits,
            fast_timeout_ms,
            total,
        });

        let mut ramp_timer = self.limits.ramp_enabled().then(|| {
            let period = Duration::from_millis(self.ramp.interval_ms.max(1));
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        loop {
            self.admit(&mut state, &mut tasks);
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = tasks.join_next() => {
                    match joined {
                        Ok(done) => self.settle(&mut state, &mut results, done, total),
                        Err(e) => warn!(error = %e, "Check task failed to join"),
                    }
                }
                _ = next_tick(&mut ramp_timer) => {
                    if let Some(change) = state.ramp_tick(&self.ramp) {
                        info!(
                            direction = ?change.direction,
                            slow_limit = change.slow_limit,
                            timeout_rate = change.timeout_rate,
                            "Slow lane resized"
                        );
                        self.emit(SchedulerEvent::Ramp(change));
                    }
                }
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    warn!(index, "No result recorded, marking offline");
                    DomainCheckResult::offline(domains[index].clone(), ErrorCode::Unknown, None)
                })
            })
            .collect()
    }

    fn admit(&self, state: &mut SchedulerState, tasks: &mut JoinSet<TaskDone>) {
        while let Some((item, from_fast_queue)) = state.admit_fast() {
            let armed = from_fast_queue && !self.fast_timeout.is_zero();
            self.start(state, tasks, Lane::Fast, item, armed);
        }
        while let Some(item) = state.admit_slow() {
            self.start(state, tasks, Lane::Slow, item, false);
        }
    }

    fn start(
        &self,
        state: &SchedulerState,
        tasks: &mut JoinSet<TaskDone>,
        lane: Lane,
        item: LaneItem,
        armed: bool,
    ) {
        let limits = state.limits();
        debug!(domain = %item.domain, %lane, armed, "Check started");
        self.emit(SchedulerEvent::Started {
            domain: &item.domain,
            lane,
            requeued: item.demoted,
            in_flight_fast: state.in_flight(Lane::Fast),
            fast_limit: limits.fast,
            in_flight_slow: state.in_flight(Lane::Slow),
            slow_limit: limits.slow,
            slow_queued: state.slow_queued(),
        });

        let checker = Arc::clone(&self.checker);
        let pending_fast = state.pending_fast();
        let fast_timeout = self.fast_timeout;
        let domain = item.domain.clone();
        let reachability = item.reachability.clone();

        tasks.spawn(async move {
            let run = run_item(
                checker.as_ref(),
                &domain,
                reachability,
                armed.then_some(fast_timeout),
                &pending_fast,
            );
            let caught = AssertUnwindSafe(run).catch_unwind().await;
            let outcome = match caught {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(domain = %domain, "Check panicked");
                    CheckOutcome::Finished(DomainCheckResult::offline(
                        domain.as_str(),
                        ErrorCode::Unknown,
                        None,
                    ))
                }
            };
            TaskDone {
                lane,
                item,
                armed,
                outcome,
            }
        });
    }

    fn settle(
        &self,
        state: &mut SchedulerState,
        results: &mut [Option<DomainCheckResult>],
        done: TaskDone,
        total: usize,
    ) {
        let TaskDone {
            lane,
            mut item,
            armed,
            outcome,
        } = done;
        state.release(lane);

        let result = match outcome {
            CheckOutcome::Demoted { reachability } if armed => {
                info!(domain = %item.domain, "Demoted to slow lane");
                self.emit(SchedulerEvent::Demoted {
                    domain: &item.domain,
                    fast_timeout_ms: self.fast_timeout.as_millis() as u64,
                });
                item.reachability = reachability.or(item.reachability);
                item.demoted = true;
                state.requeue_slow(item);
                return;
            }
            CheckOutcome::Demoted { reachability } => {
                warn!(domain = %item.domain, "Unarmed check reported demotion");
                DomainCheckResult::offline(
                    item.domain.as_str(),
                    ErrorCode::Unknown,
                    reachability.or(item.reachability),
                )
            }
            CheckOutcome::Finished(result) => result,
        };

        state.record_completion(result.error.is_some_and(|code| code.is_timeout()));
        debug!(
            domain = %item.domain,
            status = %result.status,
            error = ?result.error,
            "Check finished"
        );

        let index = item.original_index;
        if let Some(slot) = results.get_mut(index) {
            self.emit(SchedulerEvent::Completed {
                index,
                result: &result,
                done: state.completed(),
                total,
            });
            *slot = Some(result);
        }
    }
}

/// Runs one check. An armed run is cancelled once `fast_timeout` elapses if
/// other items are still waiting for the fast lane.
async fn run_item<C: DomainChecker>(
    checker: &C,
    domain: &str,
    reachability: Option<ReachabilityInfo>,
    fast_timeout: Option<Duration>,
    pending_fast: &AtomicUsize,
) -> CheckOutcome {
    let Some(fast_timeout) = fast_timeout else {
        let options = CheckOptions {
            reachability,
            ..CheckOptions::default()
        };
        return checker.check(domain, options).await;
    };

    let cancel = CancellationToken::new();
    let options = CheckOptions {
        retries: Some(0),
        reachability,
        cancel: Some(cancel.clone()),
        ..CheckOptions::default()
    };
    let check = checker.check(domain, options);
    tokio::pin!(check);

    tokio::select! {
        outcome = &mut check => return outcome,
        _ = tokio::time::sleep(fast_timeout) => {}
    }

    if pending_fast.load(Ordering::Acquire) > 0 {
        cancel.cancel();
    }
    check.await
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

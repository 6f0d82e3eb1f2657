use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{CheckConfig, RampConfig};
use crate::reachability::ReachabilityInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Fast,
    Slow,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Fast => write!(f, "fast"),
            Lane::Slow => write!(f, "slow"),
        }
    }
}

/// The unit of scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneItem {
    pub domain: String,
    /// Position in the input list; results are stored here
    pub original_index: usize,
    /// Computed before a demotion, reused by the slow lane
    pub reachability: Option<ReachabilityInfo>,
    pub demoted: bool,
}

impl LaneItem {
    pub fn new(domain: impl Into<String>, original_index: usize) -> Self {
        Self {
            domain: domain.into(),
            original_index,
            reachability: None,
            demoted: false,
        }
    }
}

/// Capacity split between the two lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLimits {
    pub fast: usize,
    pub slow: usize,
    pub min_slow: usize,
    pub max_slow: usize,
}

impl LaneLimits {
    pub fn new(concurrency: usize, max_concurrency: usize, fast_lane_ratio: f64) -> Self {
        let concurrency = concurrency.max(1);
        let share = (concurrency as f64 * fast_lane_ratio).floor() as usize;
        let fast = share.min(concurrency).max(1);
        let slow = concurrency.saturating_sub(fast);
        Self {
            fast,
            slow,
            min_slow: slow,
            max_slow: max_concurrency.saturating_sub(fast),
        }
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self::new(config.concurrency, config.max_concurrency, config.fast_lane_ratio)
    }

    pub fn ramp_enabled(&self) -> bool {
        self.max_slow > self.min_slow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RampDirection {
    Grow,
    Shrink,
}

/// A slow-lane resize decided at a ramp tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampChange {
    pub direction: RampDirection,
    pub slow_limit: usize,
    pub timeout_rate: f64,
}

/// Queues, limits and counters of one run, owned by the scheduler's driver.
#[derive(Debug)]
pub struct SchedulerState {
    fast_queue: VecDeque<LaneItem>,
    slow_queue: VecDeque<LaneItem>,
    limits: LaneLimits,
    in_flight_fast: usize,
    in_flight_slow: usize,
    completed: usize,
    timeouts: usize,
    ramp_completed: usize,
    ramp_timeouts: usize,
    /// Fast-queue length visible to running fast-lane checks
    pending_fast: Arc<AtomicUsize>,
}

impl SchedulerState {
    pub fn new(domains: &[String], limits: LaneLimits) -> Self {
        let fast_queue: VecDeque<LaneItem> = domains
            .iter()
            .enumerate()
            .map(|(index, domain)| LaneItem::new(domain.clone(), index))
            .collect();
        let pending_fast = Arc::new(AtomicUsize::new(fast_queue.len()));
        Self {
            fast_queue,
            slow_queue: VecDeque::new(),
            limits,
            in_flight_fast: 0,
            in_flight_slow: 0,
            completed: 0,
            timeouts: 0,
            ramp_completed: 0,
            ramp_timeouts: 0,
            pending_fast,
        }
    }

    pub fn limits(&self) -> LaneLimits {
        self.limits
    }

    pub fn in_flight(&self, lane: Lane) -> usize {
        match lane {
            Lane::Fast => self.in_flight_fast,
            Lane::Slow => self.in_flight_slow,
        }
    }

    pub fn queued(&self) -> usize {
        self.fast_queue.len() + self.slow_queue.len()
    }

    pub fn slow_queued(&self) -> usize {
        self.slow_queue.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn pending_fast(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pending_fast)
    }

    fn pop_fast_queue(&mut self) -> Option<LaneItem> {
        let item = self.fast_queue.pop_front();
        self.pending_fast.store(self.fast_queue.len(), Ordering::Release);
        item
    }

    /// Next item for the fast lane, and whether it came from the fast queue
    /// (only those are subject to demotion).
    pub fn admit_fast(&mut self) -> Option<(LaneItem, bool)> {
        if self.in_flight_fast >= self.limits.fast {
            return None;
        }
        let admitted = match self.pop_fast_queue() {
            Some(item) => (item, true),
            None => (self.slow_queue.pop_front()?, false),
        };
        self.in_flight_fast += 1;
        Some(admitted)
    }

    /// Next item for the slow lane: its own queue first, then the fast queue.
    pub fn admit_slow(&mut self) -> Option<LaneItem> {
        if self.in_flight_slow >= self.limits.slow {
            return None;
        }
        let item = match self.slow_queue.pop_front() {
            Some(item) => item,
            None => self.pop_fast_queue()?,
        };
        self.in_flight_slow += 1;
        Some(item)
    }

    pub fn release(&mut self, lane: Lane) {
        match lane {
            Lane::Fast => self.in_flight_fast = self.in_flight_fast.saturating_sub(1),
            Lane::Slow => self.in_flight_slow = self.in_flight_slow.saturating_sub(1),
        }
    }

    pub fn requeue_slow(&mut self, item: LaneItem) {
        self.slow_queue.push_back(item);
    }

    pub fn record_completion(&mut self, timed_out: bool) {
        self.completed += 1;
        if timed_out {
            self.timeouts += 1;
        }
    }

    /// Consumes the completions since the previous tick and decides whether
    /// the slow lane should change size.
    pub fn ramp_tick(&mut self, ramp: &RampConfig) -> Option<RampChange> {
        let done = self.completed - self.ramp_completed;
        let timeouts = self.timeouts - self.ramp_timeouts;
        self.ramp_completed = self.completed;
        self.ramp_timeouts = self.timeouts;

        if done < ramp.min_completions.max(1) {
            return None;
        }

        let timeout_rate = timeouts as f64 / done as f64;
        let in_flight = self.in_flight_fast + self.in_flight_slow;
        let at_capacity = in_flight >= self.limits.fast + self.limits.slow;
        if !at_capacity || self.queued() < ramp.queue_threshold {
            return None;
        }

        let current = self.limits.slow;
        let (direction, next) = if timeout_rate > ramp.max_timeout_rate {
            if current <= self.limits.min_slow {
                return None;
            }
            (
                RampDirection::Shrink,
                current.saturating_sub(ramp.step).max(self.limits.min_slow),
            )
        } else {
            if current >= self.limits.max_slow {
                return None;
            }
            (
                RampDirection::Grow,
                (current + ramp.step).min(self.limits.max_slow),
            )
        };

        if next == current {
            return None;
        }
        self.limits.slow = next;
        Some(RampChange {
            direction,
            slow_limit: next,
            timeout_rate,
        })
    }
}

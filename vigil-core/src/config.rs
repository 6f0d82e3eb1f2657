//! Run configuration.
//!
//! A [`CheckConfig`] is built once at startup (defaults, optional JSON file,
//! CLI overrides) and then handed by reference to every component. Times are
//! stored in milliseconds so the struct serializes to the same keys operators
//! already use in environment files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};
use crate::probe::RequestMethod;

pub const DEFAULT_TCP_PORTS: [u16; 2] = [443, 80];

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const MAX_FAST_LANE_RATIO: f64 = 0.9;
const MAX_CONCURRENCY_CEILING: usize = 1000;

/// Default ramp ceiling for a given base concurrency.
pub fn default_max_concurrency(concurrency: usize) -> usize {
    MAX_CONCURRENCY_CEILING.min((concurrency * 4).max(concurrency + 50))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Base number of simultaneous checks across both lanes
    pub concurrency: usize,
    /// Upper bound the slow lane may ramp up to (fast lane included)
    pub max_concurrency: usize,
    /// Share of `concurrency` reserved for the fast lane
    pub fast_lane_ratio: f64,
    /// Fast-lane demotion deadline; 0 disables demotion
    pub fast_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_attempts: u32,
    /// Linear backoff unit: retry `n` waits `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
    pub max_redirects: usize,
    pub request_method: RequestMethod,
    pub keep_alive: bool,
    pub max_body_bytes: usize,
    /// Simultaneous connections per protocol, shared by all lanes
    pub max_sockets: usize,
    pub max_idle_sockets: usize,
    pub user_agent: String,
    pub force_ipv4: bool,
    pub skip_dns_retries: bool,
    pub reachability: ReachabilityConfig,
    pub ramp: RampConfig,
    pub second_pass: SecondPassConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    pub enabled: bool,
    pub dns_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    pub tcp_ports: Vec<u16>,
    /// Query this nameserver instead of the system resolver configuration
    pub nameserver: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    pub step: usize,
    pub interval_ms: u64,
    /// Minimum queued items before a ramp decision is considered
    pub queue_threshold: usize,
    /// Timeout rate (0..=1) above which the slow lane shrinks
    pub max_timeout_rate: f64,
    /// Completions required in a window before the ramp reacts
    pub min_completions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondPassConfig {
    pub enabled: bool,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub dns_timeout_ms: u64,
    pub tcp_timeout_ms: u64,
    /// Falls back to the main retry count when unset
    pub retry_attempts: Option<u32>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        let concurrency = 50;
        let max_concurrency = default_max_concurrency(concurrency);
        Self {
            concurrency,
            max_concurrency,
            fast_lane_ratio: 0.2,
            fast_timeout_ms: 3_000,
            request_timeout_ms: 30_000,
            retry_attempts: 2,
            retry_backoff_ms: 2_000,
            max_redirects: 3,
            request_method: RequestMethod::Head,
            keep_alive: false,
            max_body_bytes: 64 * 1024,
            max_sockets: (max_concurrency * 2).max(128),
            max_idle_sockets: 32,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            force_ipv4: false,
            skip_dns_retries: false,
            reachability: ReachabilityConfig::default(),
            ramp: RampConfig::default(),
            second_pass: SecondPassConfig::default(),
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dns_timeout_ms: 5_000,
            tcp_timeout_ms: 5_000,
            tcp_ports: DEFAULT_TCP_PORTS.to_vec(),
            nameserver: None,
        }
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            step: 10,
            interval_ms: 15_000,
            queue_threshold: 100,
            max_timeout_rate: 0.1,
            min_completions: 5,
        }
    }
}

impl Default for SecondPassConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 15,
            timeout_ms: 45_000,
            dns_timeout_ms: 8_000,
            tcp_timeout_ms: 8_000,
            retry_attempts: None,
        }
    }
}

impl CheckConfig {
    /// Loads a base configuration from a JSON document; missing keys keep defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Clamps every knob into its usable range.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.max_concurrency = self.max_concurrency.max(self.concurrency);
        self.fast_lane_ratio = if self.fast_lane_ratio.is_finite() {
            self.fast_lane_ratio.clamp(0.0, MAX_FAST_LANE_RATIO)
        } else {
            0.2
        };
        self.max_sockets = self.max_sockets.max(self.max_concurrency * 2);
        if self.reachability.tcp_ports.is_empty() {
            self.reachability.tcp_ports = DEFAULT_TCP_PORTS.to_vec();
        }
        self.ramp.step = self.ramp.step.max(1);
        self.ramp.interval_ms = self.ramp.interval_ms.max(1_000);
        self.ramp.min_completions = self.ramp.min_completions.max(1);
        self.ramp.max_timeout_rate = if self.ramp.max_timeout_rate.is_finite() {
            self.ramp.max_timeout_rate.clamp(0.0, 1.0)
        } else {
            0.1
        };
        self.second_pass.concurrency = self.second_pass.concurrency.max(1);
        self
    }

    /// Rejects configurations that cannot run at all.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(VigilError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency < self.concurrency {
            return Err(VigilError::InvalidConfig(format!(
                "max_concurrency ({}) is below concurrency ({})",
                self.max_concurrency, self.concurrency
            )));
        }
        if !(0.0..=1.0).contains(&self.fast_lane_ratio) {
            return Err(VigilError::InvalidConfig(format!(
                "fast_lane_ratio {} is outside 0..=1",
                self.fast_lane_ratio
            )));
        }
        if self.reachability.tcp_ports.iter().any(|port| *port == 0) {
            return Err(VigilError::InvalidConfig("TCP port 0 is not probeable".to_string()));
        }
        if self.second_pass.enabled && self.second_pass.concurrency == 0 {
            return Err(VigilError::InvalidConfig(
                "second pass concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fast_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn second_pass_retries(&self) -> u32 {
        self.second_pass.retry_attempts.unwrap_or(self.retry_attempts)
    }
}

/// Parses a comma-separated port list, dropping anything that is not a port.
pub fn parse_port_list(raw: &str) -> Vec<u16> {
    raw.split(',')
        .filter_map(|value| value.trim().parse::<u16>().ok())
        .filter(|port| *port > 0)
        .collect()
}

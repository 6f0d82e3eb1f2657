//! Configuration flags. Every flag also reads the environment variable the
//! runner has always used, so existing env files keep working.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::Args;
use vigil_core::config::{default_max_concurrency, parse_port_list};
use vigil_core::{CheckConfig, RequestMethod};

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Base configuration file (JSON); flags override its values
    #[arg(long, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Simultaneous checks across both lanes
    #[arg(long, env = "CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Ceiling the slow lane may ramp up to
    #[arg(long, env = "MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Share of concurrency reserved for the fast lane (0 to 0.9)
    #[arg(long, env = "FAST_LANE_RATIO")]
    pub fast_lane_ratio: Option<f64>,

    /// Fast-lane demotion deadline in ms; 0 disables demotion
    #[arg(long, env = "FAST_TIMEOUT_MS")]
    pub fast_timeout_ms: Option<u64>,

    /// Per-request timeout in ms
    #[arg(long, env = "TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    #[arg(long, env = "RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    /// Linear backoff unit between retries in ms
    #[arg(long, env = "RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: Option<u64>,

    #[arg(long, env = "MAX_REDIRECTS")]
    pub max_redirects: Option<usize>,

    /// HEAD or GET
    #[arg(long, env = "REQUEST_METHOD")]
    pub request_method: Option<RequestMethod>,

    #[arg(long, env = "KEEP_ALIVE", value_parser = BoolishValueParser::new())]
    pub keep_alive: Option<bool>,

    #[arg(long, env = "MAX_BODY_BYTES")]
    pub max_body_bytes: Option<usize>,

    /// Connections per protocol shared by all checks
    #[arg(long, env = "MAX_SOCKETS")]
    pub max_sockets: Option<usize>,

    #[arg(long, env = "MAX_FREE_SOCKETS")]
    pub max_idle_sockets: Option<usize>,

    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    #[arg(long, env = "FORCE_IPV4", value_parser = BoolishValueParser::new())]
    pub force_ipv4: Option<bool>,

    /// Do not retry DNS failures
    #[arg(long, env = "SKIP_DNS_RETRIES", value_parser = BoolishValueParser::new())]
    pub skip_dns_retries: Option<bool>,

    /// DNS + TCP reachability checks before HTTP
    #[arg(long, env = "REACHABILITY_ENABLED", value_parser = BoolishValueParser::new())]
    pub reachability: Option<bool>,

    #[arg(long, env = "DNS_TIMEOUT_MS")]
    pub dns_timeout_ms: Option<u64>,

    #[arg(long, env = "TCP_TIMEOUT_MS")]
    pub tcp_timeout_ms: Option<u64>,

    /// Comma-separated TCP ports probed in order
    #[arg(long, env = "TCP_PORTS")]
    pub tcp_ports: Option<String>,

    /// Nameserver to query instead of the system resolver
    #[arg(long, env = "DNS_SERVER")]
    pub nameserver: Option<String>,

    #[arg(long, env = "SLOW_RAMP_STEP")]
    pub ramp_step: Option<usize>,

    #[arg(long, env = "SLOW_RAMP_INTERVAL_MS")]
    pub ramp_interval_ms: Option<u64>,

    /// Queued domains required before the slow lane ramps
    #[arg(long, env = "SLOW_RAMP_QUEUE_THRESHOLD")]
    pub ramp_queue_threshold: Option<usize>,

    /// Timeout rate (0 to 1) above which the slow lane shrinks
    #[arg(long, env = "SLOW_RAMP_MAX_TIMEOUT_PCT")]
    pub ramp_max_timeout_rate: Option<f64>,

    #[arg(long, env = "SLOW_RAMP_MIN_COMPLETIONS")]
    pub ramp_min_completions: Option<usize>,

    /// Recheck offline domains after the main pass
    #[arg(long, env = "SECOND_PASS_ENABLED", value_parser = BoolishValueParser::new())]
    pub second_pass: Option<bool>,

    #[arg(long, env = "SECOND_PASS_CONCURRENCY")]
    pub second_pass_concurrency: Option<usize>,

    #[arg(long, env = "SECOND_PASS_TIMEOUT_MS")]
    pub second_pass_timeout_ms: Option<u64>,

    #[arg(long, env = "SECOND_PASS_DNS_TIMEOUT_MS")]
    pub second_pass_dns_timeout_ms: Option<u64>,

    #[arg(long, env = "SECOND_PASS_TCP_TIMEOUT_MS")]
    pub second_pass_tcp_timeout_ms: Option<u64>,

    #[arg(long, env = "SECOND_PASS_RETRY_ATTEMPTS")]
    pub second_pass_retry_attempts: Option<u32>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl ConfigArgs {
    /// Defaults, then the config file, then flags; normalized and validated.
    pub fn resolve(self) -> anyhow::Result<CheckConfig> {
        let base = match &self.config {
            Some(path) => read_config(path)?,
            None => CheckConfig::default(),
        };
        let config = self.apply(base).normalized();
        config.validate()?;
        Ok(config)
    }

    fn apply(self, mut config: CheckConfig) -> CheckConfig {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
            config.max_concurrency = default_max_concurrency(concurrency.max(1));
        }
        set(&mut config.max_concurrency, self.max_concurrency);
        set(&mut config.fast_lane_ratio, self.fast_lane_ratio);
        set(&mut config.fast_timeout_ms, self.fast_timeout_ms);
        set(&mut config.request_timeout_ms, self.timeout_ms);
        set(&mut config.retry_attempts, self.retry_attempts);
        set(&mut config.retry_backoff_ms, self.retry_backoff_ms);
        set(&mut config.max_redirects, self.max_redirects);
        set(&mut config.request_method, self.request_method);
        set(&mut config.keep_alive, self.keep_alive);
        set(&mut config.max_body_bytes, self.max_body_bytes);
        set(&mut config.max_sockets, self.max_sockets);
        set(&mut config.max_idle_sockets, self.max_idle_sockets);
        set(&mut config.user_agent, self.user_agent);
        set(&mut config.force_ipv4, self.force_ipv4);
        set(&mut config.skip_dns_retries, self.skip_dns_retries);

        let reach = &mut config.reachability;
        set(&mut reach.enabled, self.reachability);
        set(&mut reach.dns_timeout_ms, self.dns_timeout_ms);
        set(&mut reach.tcp_timeout_ms, self.tcp_timeout_ms);
        set(&mut reach.tcp_ports, self.tcp_ports.as_deref().map(parse_port_list));
        if self.nameserver.is_some() {
            reach.nameserver = self.nameserver;
        }

        let ramp = &mut config.ramp;
        set(&mut ramp.step, self.ramp_step);
        set(&mut ramp.interval_ms, self.ramp_interval_ms);
        set(&mut ramp.queue_threshold, self.ramp_queue_threshold);
        set(&mut ramp.max_timeout_rate, self.ramp_max_timeout_rate);
        set(&mut ramp.min_completions, self.ramp_min_completions);

        let second = &mut config.second_pass;
        set(&mut second.enabled, self.second_pass);
        set(&mut second.concurrency, self.second_pass_concurrency);
        set(&mut second.timeout_ms, self.second_pass_timeout_ms);
        set(&mut second.dns_timeout_ms, self.second_pass_dns_timeout_ms);
        set(&mut second.tcp_timeout_ms, self.second_pass_tcp_timeout_ms);
        if self.second_pass_retry_attempts.is_some() {
            second.retry_attempts = self.second_pass_retry_attempts;
        }

        config
    }
}

fn read_config(path: &Path) -> anyhow::Result<CheckConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    CheckConfig::from_json(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

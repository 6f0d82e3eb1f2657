//! Rendering of scheduler events as progress-bar updates or log lines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use clap::ValueEnum;
use colored::Colorize;
use indicatif::ProgressBar;
use vigil_core::colors::StatusPalette;
use vigil_core::schedule::{RampDirection, SchedulerEvent};
use vigil_core::DomainCheckResult;

const TAG_WIDTH: usize = 7;
const DOMAIN_WIDTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogMode {
    /// Progress bar only
    #[default]
    Progress,
    /// One line per start, result, demotion and ramp change
    Stream,
    /// Offline results only
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Lanes,
    Start,
    Online,
    Offline,
    Demote,
    Ramp,
}

impl Tag {
    fn text(self) -> &'static str {
        match self {
            Tag::Lanes => "LANES",
            Tag::Start => "START",
            Tag::Online => "ONLINE",
            Tag::Offline => "OFFLINE",
            Tag::Demote => "DEMOTE",
            Tag::Ramp => "RAMP",
        }
    }

    fn visible_in(self, mode: LogMode) -> bool {
        match mode {
            LogMode::Progress => matches!(self, Tag::Lanes | Tag::Ramp),
            LogMode::Stream => true,
            LogMode::Fail => matches!(self, Tag::Lanes | Tag::Offline),
        }
    }
}

pub fn format_elapsed(ms: u128) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn fit(domain: &str, width: usize) -> String {
    if domain.chars().count() > width {
        let cut: String = domain.chars().take(width - 3).collect();
        format!("{}...", cut)
    } else {
        format!("{:<width$}", domain, width = width)
    }
}

/// Turns scheduler events into output for the chosen log mode.
pub struct EventLog {
    mode: LogMode,
    colors: bool,
    started: Instant,
    bar: Option<ProgressBar>,
    online: AtomicUsize,
    offline: AtomicUsize,
}

impl EventLog {
    pub fn new(mode: LogMode, colors: bool, bar: Option<ProgressBar>) -> Self {
        Self {
            mode,
            colors,
            started: Instant::now(),
            bar,
            online: AtomicUsize::new(0),
            offline: AtomicUsize::new(0),
        }
    }

    pub fn handle(&self, event: &SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Lanes {
                limits,
                fast_timeout_ms,
                total,
            } => self.write(
                Tag::Lanes,
                None,
                &format!(
                    "{} domains | FAST {} SLOW {} (max {}) | fast timeout {}ms",
                    total, limits.fast, limits.slow, limits.max_slow, fast_timeout_ms
                ),
            ),
            SchedulerEvent::Started {
                domain,
                lane,
                requeued,
                in_flight_fast,
                fast_limit,
                in_flight_slow,
                slow_limit,
                slow_queued,
            } => {
                let lanes = format!(
                    "FAST {}/{} SLOW {}/{} SQ {}",
                    in_flight_fast, fast_limit, in_flight_slow, slow_limit, slow_queued
                );
                if let Some(bar) = &self.bar {
                    bar.set_message(format!("{} | {}", self.tally(), lanes));
                }
                let requeued = if *requeued { " (requeued)" } else { "" };
                self.write(
                    Tag::Start,
                    Some(*domain),
                    &format!("{} lane{} | {}", lane, requeued, lanes),
                );
            }
            SchedulerEvent::Completed { result, done, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(*done as u64);
                }
                self.record(result);
            }
            SchedulerEvent::Demoted {
                domain,
                fast_timeout_ms,
            } => self.write(
                Tag::Demote,
                Some(*domain),
                &format!("fast-timeout={}ms", fast_timeout_ms),
            ),
            SchedulerEvent::Ramp(change) => {
                let verb = match change.direction {
                    RampDirection::Grow => "grow",
                    RampDirection::Shrink => "shrink",
                };
                self.write(
                    Tag::Ramp,
                    None,
                    &format!(
                        "slow lane {} to {} (timeout rate {:.1}%)",
                        verb,
                        change.slow_limit,
                        change.timeout_rate * 100.0
                    ),
                );
            }
        }
    }

    /// Second-pass progress shares the result rendering of the main pass.
    pub fn recovery(&self, done: usize, result: &DomainCheckResult) {
        if let Some(bar) = &self.bar {
            bar.set_position(done as u64);
        }
        self.record(result);
    }

    fn record(&self, result: &DomainCheckResult) {
        if result.is_online() {
            self.online.fetch_add(1, Ordering::Relaxed);
            let mut details = match (result.http_code, result.response_time_ms) {
                (Some(code), Some(ms)) => format!("{} in {}ms", code, ms),
                (Some(code), None) => code.to_string(),
                _ => String::new(),
            };
            if !result.redirect_chain.is_empty() {
                details.push_str(&format!(" | redirects {}", result.redirect_chain.len()));
            }
            self.write(Tag::Online, Some(&result.domain), &details);
        } else {
            self.offline.fetch_add(1, Ordering::Relaxed);
            let error = result.error.map(|e| e.to_string()).unwrap_or_default();
            self.write(Tag::Offline, Some(&result.domain), &error);
        }
    }

    fn tally(&self) -> String {
        format!(
            "ON {} OFF {}",
            self.online.load(Ordering::Relaxed),
            self.offline.load(Ordering::Relaxed)
        )
    }

    fn paint(&self, tag: Tag) -> String {
        let text = format!("{:<width$}", tag.text(), width = TAG_WIDTH);
        if !self.colors {
            return text;
        }
        match tag {
            Tag::Online => text.good().to_string(),
            Tag::Offline => text.bad().to_string(),
            Tag::Start => text.label().to_string(),
            Tag::Demote => text.demoted().to_string(),
            Tag::Ramp | Tag::Lanes => text.accent().bold().to_string(),
        }
    }

    fn write(&self, tag: Tag, domain: Option<&str>, details: &str) {
        if !tag.visible_in(self.mode) {
            return;
        }
        let elapsed = format_elapsed(self.started.elapsed().as_millis());
        let elapsed = if self.colors {
            elapsed.muted().to_string()
        } else {
            elapsed
        };
        let line = match domain {
            Some(domain) => format!(
                "{} | {} | {} | {}",
                elapsed,
                self.paint(tag),
                fit(domain, DOMAIN_WIDTH),
                details
            ),
            None => format!("{} | {} | {}", elapsed, self.paint(tag), details),
        };
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(line),
            _ => println!("{}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_visibility() {
        assert!(Tag::Ramp.visible_in(LogMode::Progress));
        assert!(!Tag::Online.visible_in(LogMode::Progress));
        assert!(Tag::Start.visible_in(LogMode::Stream));
        assert!(Tag::Offline.visible_in(LogMode::Fail));
        assert!(!Tag::Demote.visible_in(LogMode::Fail));
    }

    #[test]
    fn test_fit_and_elapsed() {
        assert_eq!(fit("a.example", 12), "a.example   ");
        assert_eq!(fit("very-long-domain.example", 10), "very-lo...");
        assert_eq!(format_elapsed(3_723_000), "01:02:03");
    }
}

use colored::Colorize;

use super::OutputFormatter;
use crate::check::DomainCheckResult;
use crate::colors::StatusPalette;
use crate::probe::{HeaderSummary, SslInfo};
use crate::reachability::ReachabilityInfo;
use crate::summary::RunReport;

pub fn format_duration_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    if total_secs < 1 {
        format!("{}ms", ms)
    } else if total_secs < 60 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else if total_secs < 3600 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else {
        format!("{}h {}m", total_secs / 3600, (total_secs % 3600) / 60)
    }
}

fn percent(part: usize, total: usize) -> String {
    if total == 0 {
        "0.0%".to_string()
    } else {
        format!("{:.1}%", part as f64 * 100.0 / total as f64)
    }
}

pub struct HumanFormatter {
    use_colors: bool,
}

impl Default for HumanFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanFormatter {
    pub fn new() -> Self {
        Self { use_colors: true }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    fn label(&self, text: &str) -> String {
        if self.use_colors {
            text.label().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn value(&self, text: &str) -> String {
        if self.use_colors {
            text.value().to_string()
        } else {
            text.to_string()
        }
    }

    fn success(&self, text: &str) -> String {
        if self.use_colors {
            text.good().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn warning(&self, text: &str) -> String {
        if self.use_colors {
            text.caution().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn error(&self, text: &str) -> String {
        if self.use_colors {
            text.bad().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn header(&self, text: &str) -> String {
        if self.use_colors {
            format!("\n{}\n{}", text.accent().bold(), "─".repeat(text.len()).muted())
        } else {
            format!("\n{}\n{}", text, "-".repeat(text.len()))
        }
    }

    fn line(&self, indent: usize, label: &str, value: String) -> String {
        format!("{}{}: {}", " ".repeat(indent), self.label(label), value)
    }

    fn http_code(&self, code: u16) -> String {
        let text = code.to_string();
        match code {
            200..=299 => self.success(&text),
            300..=399 => self.warning(&text),
            _ => self.error(&text),
        }
    }

    fn ssl_lines(&self, ssl: &SslInfo, output: &mut Vec<String>) {
        output.push(format!("\n  {}:", self.label("SSL Certificate")));
        output.push(self.line(4, "Subject", self.value(&ssl.subject)));
        output.push(self.line(4, "Issuer", self.value(&ssl.issuer)));

        let trust = match (ssl.valid_by_trust_store, ssl.self_signed) {
            (true, _) => self.success("Trusted"),
            (false, true) => self.error("Untrusted (self-signed)"),
            (false, false) => self.error("Untrusted"),
        };
        output.push(self.line(4, "Status", trust));

        if let Some(from) = ssl.valid_from {
            output.push(self.line(
                4,
                "Valid From",
                self.value(&from.format("%Y-%m-%d").to_string()),
            ));
        }
        if let (Some(to), Some(days)) = (ssl.valid_to, ssl.days_until_expiry) {
            let expiry = to.format("%Y-%m-%d").to_string();
            let display = if days < 0 {
                self.error(&format!("{} (expired {} days ago!)", expiry, -days))
            } else if days <= 30 {
                self.error(&format!("{} ({} days!)", expiry, days))
            } else if days < 90 {
                self.warning(&format!("{} ({} days)", expiry, days))
            } else {
                self.value(&format!("{} ({} days)", expiry, days))
            };
            output.push(self.line(4, "Expires", display));
        }
    }

    fn header_lines(&self, headers: &HeaderSummary, output: &mut Vec<String>) {
        if headers.is_empty() {
            return;
        }
        output.push(format!("\n  {}:", self.label("Headers")));
        let fields = [
            ("Server", headers.server.clone()),
            ("Content-Type", headers.content_type.clone()),
            ("X-Powered-By", headers.powered_by.clone()),
            ("Via", headers.via.clone()),
            ("Cache-Control", headers.cache_control.clone()),
            ("Content-Length", headers.content_length.map(|n| n.to_string())),
            ("Last-Modified", headers.last_modified.clone()),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                output.push(self.line(4, name, self.value(&value)));
            }
        }
    }

    fn reachability_lines(&self, reach: &ReachabilityInfo, output: &mut Vec<String>) {
        output.push(format!("\n  {}:", self.label("Reachability")));

        let dns = if reach.dns.ok {
            let addresses: Vec<String> = reach.dns.addresses().map(|ip| ip.to_string()).collect();
            self.success(&format!(
                "ok in {} ({})",
                format_duration_ms(reach.dns.elapsed_ms),
                addresses.join(", ")
            ))
        } else {
            self.error(&reach.dns.failure().to_string())
        };
        output.push(self.line(4, "DNS", dns));

        let port = reach
            .tcp
            .port
            .map(|p| format!(":{}", p))
            .unwrap_or_default();
        let tcp = if reach.tcp.ok {
            let elapsed = reach.tcp.elapsed_ms.map(format_duration_ms).unwrap_or_default();
            self.success(&format!("open{} in {}", port, elapsed))
        } else {
            let code = reach
                .tcp
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "failed".to_string());
            self.error(&format!("{}{}", code, port))
        };
        output.push(self.line(4, "TCP", tcp));
    }
}

impl OutputFormatter for HumanFormatter {
    fn format_result(&self, result: &DomainCheckResult) -> String {
        let mut output = Vec::new();

        output.push(self.header(&format!("Check: {}", result.domain)));

        let status = if result.is_online() {
            self.success("Online")
        } else {
            self.error("Offline")
        };
        output.push(self.line(2, "Status", status));

        if let Some(code) = result.http_code {
            output.push(self.line(2, "HTTP Status", self.http_code(code)));
        }
        if let Some(ms) = result.response_time_ms {
            output.push(self.line(2, "Response Time", self.value(&format_duration_ms(ms))));
        }
        if let Some(error) = result.error {
            output.push(self.line(2, "Error", self.error(error.as_str())));
        }

        if !result.redirect_chain.is_empty() {
            output.push(format!("\n  {}:", self.label("Redirects")));
            for hop in &result.redirect_chain {
                output.push(format!(
                    "    {} {}",
                    self.warning(&hop.status_code.to_string()),
                    self.value(&hop.url)
                ));
            }
            if let Some(ref final_url) = result.final_url {
                output.push(self.line(4, "Final URL", self.value(final_url)));
            }
        }

        match result.ssl_info {
            Some(ref ssl) if ssl.enabled => self.ssl_lines(ssl, &mut output),
            _ if result.is_online() => output.push(format!(
                "\n  {}: {}",
                self.label("SSL Certificate"),
                self.warning("Not available (served over plain HTTP)")
            )),
            _ => {}
        }

        if let Some(ref headers) = result.headers {
            self.header_lines(headers, &mut output);
        }
        if let Some(ref reach) = result.reachability {
            self.reachability_lines(reach, &mut output);
        }

        output.push(format!(
            "\n  {}: {}",
            self.label("Checked"),
            self.value(&result.checked_at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        ));

        output.join("\n")
    }

    fn format_report(&self, report: &RunReport) -> String {
        let mut output = Vec::new();
        let summary = &report.summary;
        let total = summary.total_domains;

        output.push(self.header("Run Summary"));
        output.push(self.line(2, "Domains", self.value(&total.to_string())));
        output.push(self.line(
            2,
            "Online",
            self.success(&format!("{} ({})", summary.online, percent(summary.online, total))),
        ));
        output.push(self.line(
            2,
            "Offline",
            self.error(&format!("{} ({})", summary.offline, percent(summary.offline, total))),
        ));
        output.push(self.line(
            2,
            "Duration",
            self.value(&format!(
                "{} ({:.1} domains/s)",
                format_duration_ms(report.duration_ms),
                report.throughput_per_sec
            )),
        ));

        output.push(self.header("Response Times"));
        output.push(self.line(
            2,
            "Average",
            self.value(&format_duration_ms(summary.avg_response_time_ms)),
        ));
        for (name, value) in [
            ("p50", report.response_times.p50),
            ("p90", report.response_times.p90),
            ("p95", report.response_times.p95),
        ] {
            if let Some(ms) = value {
                output.push(self.line(2, name, self.value(&format_duration_ms(ms))));
            }
        }
        if !report.slowest.is_empty() {
            output.push(format!("  {}:", self.label("Slowest")));
            for slow in &report.slowest {
                output.push(format!(
                    "    {} {}",
                    self.warning(&format!("{:>8}", format_duration_ms(slow.response_time_ms))),
                    self.value(&slow.domain)
                ));
            }
        }

        output.push(self.header("HTTP Codes"));
        let codes = &report.http_codes;
        output.push(format!(
            "  {} {}  {} {}  {} {}  {} {}  {} {}",
            self.label("2xx"),
            self.success(&codes.success.to_string()),
            self.label("3xx"),
            self.warning(&codes.redirect.to_string()),
            self.label("4xx"),
            self.error(&codes.client_error.to_string()),
            self.label("5xx"),
            self.error(&codes.server_error.to_string()),
            self.label("none"),
            self.error(&codes.error.to_string()),
        ));

        if summary.offline > 0 {
            output.push(self.header("Offline Errors"));
            let errors = &report.errors;
            for (name, count) in [
                ("Timeout", errors.timeout),
                ("DNS", errors.dns),
                ("Reset", errors.reset),
                ("Refused", errors.refused),
                ("Other", errors.other),
            ] {
                if count > 0 {
                    output.push(self.line(
                        2,
                        name,
                        self.error(&format!("{} ({})", count, percent(count, summary.offline))),
                    ));
                }
            }
        }

        if report.redirects.with_redirects > 0 {
            let redirects = &report.redirects;
            output.push(self.header("Redirects"));
            output.push(self.line(
                2,
                "Redirected",
                self.value(&format!(
                    "{} ({} online)",
                    redirects.with_redirects, redirects.online_with_redirects
                )),
            ));
            output.push(self.line(
                2,
                "Chain",
                self.value(&format!(
                    "avg {:.1}, max {}",
                    redirects.avg_chain, redirects.max_chain
                )),
            ));
        }

        output.push(self.header("SSL"));
        output.push(self.line(
            2,
            "With SSL",
            self.value(&format!("{} of {} online", summary.with_ssl, summary.online)),
        ));
        output.push(self.line(2, "Valid", self.success(&report.ssl.valid.to_string())));
        if report.ssl.invalid > 0 {
            output.push(self.line(2, "Invalid", self.error(&report.ssl.invalid.to_string())));
        }
        if report.ssl.self_signed > 0 {
            output.push(self.line(
                2,
                "Self-signed",
                self.error(&report.ssl.self_signed.to_string()),
            ));
        }
        if report.ssl.expiring_soon > 0 {
            output.push(self.line(
                2,
                "Expiring ≤ 30d",
                self.warning(&report.ssl.expiring_soon.to_string()),
            ));
        }

        if let Some(ref reach) = report.reachability {
            output.push(self.header("Reachability"));
            output.push(self.line(
                2,
                "DNS",
                format!(
                    "{} ok, {} failed",
                    self.success(&reach.dns_ok.to_string()),
                    self.error(&reach.dns_fail.to_string())
                ),
            ));
            output.push(self.line(
                2,
                "TCP",
                format!(
                    "{} ok, {} failed",
                    self.success(&reach.tcp_ok.to_string()),
                    self.error(&reach.tcp_fail.to_string())
                ),
            ));
            output.push(self.line(
                2,
                "Reachable, HTTP failed",
                self.warning(&format!(
                    "{} ({} timeouts)",
                    reach.reachable_but_http_failed, reach.timeout_with_tcp_ok
                )),
            ));
        }

        if let Some(ref second) = report.second_pass {
            output.push(self.header("Second Pass"));
            output.push(self.line(2, "Rechecked", self.value(&second.total.to_string())));
            output.push(self.line(2, "Recovered", self.success(&second.recovered.to_string())));
            output.push(self.line(
                2,
                "Still offline",
                self.error(&second.still_offline.to_string()),
            ));
            output.push(self.line(
                2,
                "Duration",
                self.value(&format_duration_ms(second.duration_ms)),
            ));
        }

        output.join("\n")
    }
}

use super::OutputFormatter;
use crate::check::DomainCheckResult;
use crate::summary::RunReport;

pub struct JsonFormatter {
    pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    fn to_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> String {
        if self.pretty {
            serde_json::to_string_pretty(value)
                .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        } else {
            serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_result(&self, result: &DomainCheckResult) -> String {
        self.to_json(result)
    }

    fn format_report(&self, report: &RunReport) -> String {
        self.to_json(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_compact_result() {
        let result = DomainCheckResult::offline("a.example", ErrorCode::DnsNotFound, None);
        let line = JsonFormatter::new().compact().format_result(&result);
        assert!(!line.contains('\n'));
        assert!(line.contains("\"status\":\"offline\""));
        assert!(line.contains("\"error\":\"DNS_NOT_FOUND\""));
    }
}

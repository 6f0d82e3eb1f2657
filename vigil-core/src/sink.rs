//! Persistence boundary for finished runs.

use std::cmp::Ordering;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::check::DomainCheckResult;
use crate::error::{Result, VigilError};
use crate::schedule::RecoveryStats;
use crate::summary::CheckSummary;

/// The check-level record shared by every domain record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub check_id: String,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: CheckSummary,
    pub second_pass: Option<RecoveryStats>,
}

impl CheckRecord {
    /// The check id is derived from the start time, so records of one run
    /// sort next to each other.
    pub fn new(
        checked_at: DateTime<Utc>,
        duration: Duration,
        results: &[DomainCheckResult],
        second_pass: Option<RecoveryStats>,
    ) -> Self {
        Self {
            check_id: format!("check-{}", checked_at.format("%Y%m%dT%H%M%S%.3fZ")),
            checked_at,
            duration_ms: duration.as_millis() as u64,
            summary: CheckSummary::from_results(results),
            second_pass,
        }
    }

    /// Duration in the `"12.3s"` form operators read.
    pub fn duration_label(&self) -> String {
        format!("{:.1}s", self.duration_ms as f64 / 1000.0)
    }
}

/// Accepts one finished run: the check record plus the batch of domain
/// records tagged with its id.
pub trait StorageSink: Send + Sync {
    fn store(
        &self,
        record: &CheckRecord,
        results: &[DomainCheckResult],
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusMeta<'a> {
    generated_at: DateTime<Utc>,
    check_id: &'a str,
    #[serde(flatten)]
    summary: &'a CheckSummary,
    check_duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    second_pass: Option<&'a RecoveryStats>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaggedResult<'a> {
    check_id: &'a str,
    #[serde(flatten)]
    result: &'a DomainCheckResult,
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    #[serde(rename = "_meta")]
    meta: StatusMeta<'a>,
    domains: Vec<TaggedResult<'a>>,
}

/// Writes a `status.json` style snapshot: `_meta` plus every domain,
/// online first, then by name.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(&self, record: &CheckRecord, results: &[DomainCheckResult]) -> Result<Vec<u8>> {
        let mut sorted: Vec<&DomainCheckResult> = results.iter().collect();
        sorted.sort_by(|a, b| match (a.is_online(), b.is_online()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.domain.cmp(&b.domain),
        });

        let document = StatusDocument {
            meta: StatusMeta {
                generated_at: Utc::now(),
                check_id: &record.check_id,
                summary: &record.summary,
                check_duration: record.duration_label(),
                second_pass: record.second_pass.as_ref(),
            },
            domains: sorted
                .into_iter()
                .map(|result| TaggedResult {
                    check_id: &record.check_id,
                    result,
                })
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&document)?)
    }
}

impl StorageSink for JsonFileSink {
    #[instrument(skip_all, fields(path = %self.path.display(), domains = results.len()))]
    async fn store(&self, record: &CheckRecord, results: &[DomainCheckResult]) -> Result<()> {
        let body = self.render(record, results)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Readers never see a partially written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| VigilError::Sink(format!("{}: {}", self.path.display(), e)))?;

        info!(check_id = %record.check_id, "Results written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::error::ErrorCode;
    use chrono::TimeZone;

    fn online(domain: &str, ms: u64) -> DomainCheckResult {
        let mut result = DomainCheckResult::offline(domain, ErrorCode::Unknown, None);
        result.status = CheckStatus::Online;
        result.error = None;
        result.http_code = Some(200);
        result.response_time_ms = Some(ms);
        result
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vigil-sink-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_check_record() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let results = vec![online("a.example", 100)];
        let record = CheckRecord::new(at, Duration::from_millis(12_345), &results, None);

        assert_eq!(record.check_id, "check-20260301T120000.000Z");
        assert_eq!(record.duration_label(), "12.3s");
        assert_eq!(record.summary.online, 1);
    }

    #[tokio::test]
    async fn test_json_file_sink_layout() {
        let path = temp_path("status.json");
        let sink = JsonFileSink::new(&path);
        let results = vec![
            DomainCheckResult::offline("a.example", ErrorCode::Timeout, None),
            online("z.example", 120),
            online("m.example", 80),
        ];
        let record = CheckRecord::new(Utc::now(), Duration::from_secs(3), &results, None);

        sink.store(&record, &results).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();

        let meta = &json["_meta"];
        assert_eq!(meta["totalDomains"], 3);
        assert_eq!(meta["online"], 2);
        assert_eq!(meta["avgResponseTimeMs"], 100);
        assert_eq!(meta["checkDuration"], "3.0s");
        assert!(meta.get("secondPass").is_none());

        let order: Vec<&str> = json["domains"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["domain"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["m.example", "z.example", "a.example"]);
        assert_eq!(json["domains"][0]["checkId"], record.check_id.as_str());
        assert_eq!(json["domains"][2]["error"], "TIMEOUT");
    }
}

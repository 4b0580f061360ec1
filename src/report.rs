use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::processor::RunSummary;
use crate::store;

#[derive(Serialize)]
struct RunReport {
    started_at: String,
    finished_at: String,
    elapsed_secs: i64,
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    retried: usize,
}

impl From<&RunSummary> for RunReport {
    fn from(summary: &RunSummary) -> Self {
        Self {
            started_at: summary.started_at.to_rfc3339(),
            finished_at: summary.finished_at.to_rfc3339(),
            elapsed_secs: (summary.finished_at - summary.started_at).num_seconds(),
            total: summary.total,
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            retried: summary.retried,
        }
    }
}

// Overwrites the previous run's report
pub fn write_report(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&RunReport::from(summary))?;
    store::write_atomic(path, json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn report_carries_counts_and_timestamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("last_run.json");
        let started_at = Utc::now();
        let summary = RunSummary {
            total: 3,
            succeeded: 2,
            failed: 1,
            skipped: 0,
            retried: 0,
            started_at,
            finished_at: started_at + Duration::seconds(90),
        };

        write_report(&summary, &path).unwrap();

        let report: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report["total"], 3);
        assert_eq!(report["succeeded"], 2);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["elapsed_secs"], 90);
        assert_eq!(report["started_at"], started_at.to_rfc3339());
    }
}

use anyhow::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::config::LogPaths;
use crate::ids::{self, AppId};
use crate::store::{Category, RecordStore};

/// In-memory view of the checkpoint logs for one run.
///
/// Loading normalises what may be on disk after a crash: `fetched` always
/// contains every classified id, and a success removes the id from `failed`.
#[derive(Debug, Default)]
pub struct CheckpointState {
    pub fetched: HashSet<AppId>,
    pub succeeded: HashSet<AppId>,
    pub failed: HashSet<AppId>,
    pub retries: HashMap<AppId, u32>,
}

impl CheckpointState {
    pub fn retry_count(&self, id: &AppId) -> u32 {
        self.retries.get(id).copied().unwrap_or(0)
    }

    pub fn record_success(&mut self, id: &AppId) {
        self.failed.remove(id);
        self.succeeded.insert(id.clone());
        self.fetched.insert(id.clone());
    }

    pub fn record_failure(&mut self, id: &AppId) {
        self.succeeded.remove(id);
        self.failed.insert(id.clone());
        self.fetched.insert(id.clone());
    }

    pub fn record_retry(&mut self, id: &AppId) {
        *self.retries.entry(id.clone()).or_insert(0) += 1;
    }
}

/// Append-only id logs under `<root>/logs`.
pub struct CheckpointLog {
    paths: LogPaths,
}

impl CheckpointLog {
    pub fn new(paths: LogPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// Ids recorded as fetched. Empty when the log does not exist yet.
    pub fn load_fetched(&self) -> Result<HashSet<AppId>> {
        ids::read_id_set(&self.paths.fetched)
    }

    pub fn load(&self) -> Result<CheckpointState> {
        let mut fetched = self.load_fetched()?;
        let succeeded = ids::read_id_set(&self.paths.succeeded)?;
        let mut failed = ids::read_id_set(&self.paths.failed)?;
        let retries = ids::count_occurrences(&self.paths.retried)?;

        failed.retain(|id| !succeeded.contains(id));
        fetched.extend(succeeded.iter().cloned());
        fetched.extend(failed.iter().cloned());

        debug!(
            fetched = fetched.len(),
            succeeded = succeeded.len(),
            failed = failed.len(),
            retried = retries.len(),
            "Loaded checkpoint"
        );

        Ok(CheckpointState {
            fetched,
            succeeded,
            failed,
            retries,
        })
    }

    /// Append the outcome for `id`: outcome log, retried log on a retry,
    /// then the fetched log.
    pub fn log_outcome(&self, id: &AppId, succeeded: bool, is_retry: bool) -> Result<()> {
        let outcome_log = if succeeded {
            &self.paths.succeeded
        } else {
            &self.paths.failed
        };

        append_line(outcome_log, id)?;
        if is_retry {
            append_line(&self.paths.retried, id)?;
        }
        append_line(&self.paths.fetched, id)?;

        Ok(())
    }

    /// Recompute the fetched, succeeded and failed logs from the record
    /// files present under `store`. The retried log is left alone.
    pub fn rebuild(&self, store: &RecordStore) -> Result<RebuildSummary> {
        let mut succeeded = BTreeSet::new();
        let mut failed = BTreeSet::new();

        for record in store.scan()? {
            match record.category {
                Category::Details => succeeded.insert(record.id),
                Category::Errors => failed.insert(record.id),
            };
        }

        failed.retain(|id| !succeeded.contains(id));
        let fetched: BTreeSet<AppId> = succeeded.union(&failed).cloned().collect();

        ids::write_ids(&self.paths.succeeded, &succeeded)?;
        ids::write_ids(&self.paths.failed, &failed)?;
        ids::write_ids(&self.paths.fetched, &fetched)?;

        let summary = RebuildSummary {
            succeeded: succeeded.len(),
            failed: failed.len(),
            fetched: fetched.len(),
        };

        info!(
            "Rebuilt logs: {} succeeded, {} failed, {} fetched",
            summary.succeeded, summary.failed, summary.fetched
        );

        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub fetched: usize,
}

fn append_line(path: &Path, id: &AppId) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format!("{id}\n").as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn id(s: &str) -> AppId {
        s.parse().unwrap()
    }

    fn set(items: &[&str]) -> HashSet<AppId> {
        items.iter().map(|s| id(s)).collect()
    }

    #[test]
    fn load_without_logs_is_empty() {
        let dir = tempdir().unwrap();
        let log = CheckpointLog::new(LogPaths::new(dir.path()));

        assert!(log.load_fetched().unwrap().is_empty());
        let state = log.load().unwrap();
        assert!(state.fetched.is_empty());
        assert!(state.retries.is_empty());
    }

    #[test]
    fn log_outcome_appends_lines() {
        let dir = tempdir().unwrap();
        let log = CheckpointLog::new(LogPaths::new(dir.path()));

        log.log_outcome(&id("10"), true, false).unwrap();
        log.log_outcome(&id("20"), false, false).unwrap();
        log.log_outcome(&id("20"), false, true).unwrap();

        let paths = log.paths();
        assert_eq!(fs::read_to_string(&paths.fetched).unwrap(), "10\n20\n20\n");
        assert_eq!(fs::read_to_string(&paths.succeeded).unwrap(), "10\n");
        assert_eq!(fs::read_to_string(&paths.failed).unwrap(), "20\n20\n");
        assert_eq!(fs::read_to_string(&paths.retried).unwrap(), "20\n");
    }

    #[test]
    fn load_repairs_crash_leftovers() {
        let dir = tempdir().unwrap();
        let paths = LogPaths::new(dir.path());
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        // 30 was classified but the fetched append never happened.
        fs::write(&paths.fetched, "10\n20\n").unwrap();
        fs::write(&paths.succeeded, "10\n20\n").unwrap();
        fs::write(&paths.failed, "20\n30\n").unwrap();
        fs::write(&paths.retried, "20\n20\n").unwrap();

        let state = CheckpointLog::new(paths).load().unwrap();

        assert_eq!(state.fetched, set(&["10", "20", "30"]));
        assert_eq!(state.succeeded, set(&["10", "20"]));
        assert_eq!(state.failed, set(&["30"]));
        assert!(state.succeeded.is_disjoint(&state.failed));
        assert_eq!(state.retry_count(&id("20")), 2);
        assert_eq!(state.retry_count(&id("30")), 0);
    }

    #[test]
    fn state_transitions_keep_sets_disjoint() {
        let mut state = CheckpointState::default();
        state.record_failure(&id("5"));
        state.record_retry(&id("5"));
        state.record_success(&id("5"));

        assert_eq!(state.fetched, set(&["5"]));
        assert_eq!(state.succeeded, set(&["5"]));
        assert!(state.failed.is_empty());
        assert_eq!(state.retry_count(&id("5")), 1);
    }

    #[test]
    fn rebuild_derives_logs_from_disk_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path(), 1000);
        let log = CheckpointLog::new(LogPaths::new(dir.path()));

        store.persist(&id("1500"), &json!({}), Category::Details).unwrap();
        store.persist(&id("30"), &json!({}), Category::Details).unwrap();
        store.persist(&id("20"), &json!({}), Category::Errors).unwrap();
        // Drifted logs from an earlier crash.
        log.log_outcome(&id("99"), true, false).unwrap();
        log.log_outcome(&id("20"), false, true).unwrap();

        let first = log.rebuild(&store).unwrap();
        let paths = log.paths();
        let snapshot = |p: &Path| fs::read_to_string(p).unwrap();
        let before = (
            snapshot(&paths.fetched),
            snapshot(&paths.succeeded),
            snapshot(&paths.failed),
        );

        let second = log.rebuild(&store).unwrap();
        let after = (
            snapshot(&paths.fetched),
            snapshot(&paths.succeeded),
            snapshot(&paths.failed),
        );

        assert_eq!(first, second);
        assert_eq!(before, after);
        assert_eq!(before.0, "20\n30\n1500\n");
        assert_eq!(before.1, "30\n1500\n");
        assert_eq!(before.2, "20\n");
        assert_eq!(snapshot(&paths.retried), "20\n");
    }
}

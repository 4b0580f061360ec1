use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointLog, CheckpointState};
use crate::config::Config;
use crate::ids::AppId;
use crate::source::{self, CatalogSource, FetchError};
use crate::store::{Category, RecordStore};

const STATS_KEY: &str = "steamspy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySucceeded,
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Network, status or body error; nothing was written.
    #[error("transport error: {0}")]
    Transport(String),
    /// Well-formed response without a true success flag.
    #[error("not available from the catalog")]
    Application,
    /// Local write failure for this id.
    #[error("write error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(Failure),
    Skipped(SkipReason),
}

/// What `process_one` did for one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub outcome: Outcome,
    /// The attempt was a retry of an id that failed on an earlier run.
    pub retried: bool,
}

/// Payload for one id plus its classification.
#[derive(Debug, Clone)]
pub struct Record {
    pub payload: Value,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retried: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Sequential fetch/persist/log pipeline over a list of ids.
pub struct Processor<S> {
    source: S,
    store: RecordStore,
    log: CheckpointLog,
    max_retries: u32,
    force: bool,
}

impl<S: CatalogSource> Processor<S> {
    pub fn new(config: &Config, source: S) -> Self {
        Self {
            source,
            store: RecordStore::new(&config.root, config.shard_width),
            log: CheckpointLog::new(config.log_paths()),
            max_retries: config.max_retries,
            force: false,
        }
    }

    /// Refetch every id regardless of what the checkpoint says.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn checkpoint(&self) -> &CheckpointLog {
        &self.log
    }

    pub fn load_checkpoint(&self) -> Result<CheckpointState> {
        self.log.load()
    }

    fn skip_reason(&self, id: &AppId, state: &CheckpointState) -> Option<SkipReason> {
        if self.force || !state.fetched.contains(id) {
            return None;
        }
        if !state.failed.contains(id) {
            return Some(SkipReason::AlreadySucceeded);
        }
        if state.retry_count(id) >= self.max_retries {
            return Some(SkipReason::RetriesExhausted);
        }
        None
    }

    /// Fetch the details response for `id`, classify it, and when it has an
    /// entry for the id fold the community stats into that entry.
    ///
    /// The payload is the id's entry, or the whole body when the entry is
    /// missing.
    pub async fn fetch_record(&self, id: &AppId) -> Result<Record, FetchError> {
        let body = self.source.fetch_details(id).await?;
        let success = source::is_success(&body, id);

        let Some(mut entry) = source::entry_for(&body, id).cloned() else {
            return Ok(Record {
                payload: body,
                success,
            });
        };

        match self.source.fetch_stats(id).await {
            Ok(Some(stats)) => {
                if let Some(object) = entry.as_object_mut() {
                    object.insert(STATS_KEY.to_string(), stats);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Stats unavailable for {id}: {e}"),
        }

        Ok(Record {
            payload: entry,
            success,
        })
    }

    pub async fn process_one(&self, id: &AppId, state: &mut CheckpointState) -> Processed {
        if let Some(reason) = self.skip_reason(id, state) {
            match reason {
                SkipReason::AlreadySucceeded => info!("Skipping {id}: already succeeded"),
                SkipReason::RetriesExhausted => info!("Skipping {id}: retries exhausted"),
            }
            return Processed {
                outcome: Outcome::Skipped(reason),
                retried: false,
            };
        }

        let is_retry = state.failed.contains(id);
        if is_retry {
            info!("Retrying {id} (previously failed)");
        }
        // Only reachable with force: a stored success outlives a failed refetch.
        let had_success = state.succeeded.contains(id);

        let outcome = match self.fetch_record(id).await {
            Ok(record) if !record.success && had_success => {
                warn!("Refetch of {id} failed; keeping the stored success");
                Outcome::Failed(Failure::Application)
            }
            Ok(record) => {
                let category = if record.success {
                    Category::Details
                } else {
                    Category::Errors
                };

                match self.store.persist(id, &record.payload, category) {
                    Ok(_) if record.success => Outcome::Succeeded,
                    Ok(_) => Outcome::Failed(Failure::Application),
                    Err(e) => {
                        error!("Write error for {id}: {e}");
                        Outcome::Failed(Failure::Io(e.to_string()))
                    }
                }
            }
            Err(e) => {
                warn!("Fetch error for {id}: {e}");
                Outcome::Failed(Failure::Transport(e.to_string()))
            }
        };

        let succeeded = outcome == Outcome::Succeeded;
        if let Err(e) = self.log.log_outcome(id, succeeded, is_retry) {
            error!("Checkpoint write error for {id}: {e}");
        }

        if succeeded {
            state.record_success(id);
        } else if !had_success {
            state.record_failure(id);
        }
        if is_retry {
            state.record_retry(id);
        }

        Processed {
            outcome,
            retried: is_retry,
        }
    }

    /// Process `ids` in input order. Per-id failures never stop the batch.
    pub async fn run(&self, ids: &[AppId]) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut state = self.load_checkpoint()?;

        let total = ids.len();
        let mut summary = RunSummary {
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            retried: 0,
            started_at,
            finished_at: started_at,
        };

        let mut seen = HashSet::new();

        for (i, id) in ids.iter().enumerate() {
            info!("Processing {}/{}: {}", i + 1, total, id);

            if !seen.insert(id) {
                info!("Skipping {id}: duplicate");
                summary.skipped += 1;
                continue;
            }

            let Processed { outcome, retried } = self.process_one(id, &mut state).await;

            match &outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed(failure) => {
                    debug!("{id} failed: {failure}");
                    summary.failed += 1;
                }
                Outcome::Skipped(_) => summary.skipped += 1,
            }
            if retried {
                summary.retried += 1;
            }
        }

        summary.finished_at = Utc::now();

        info!(
            "Run finished: {} succeeded, {} failed, {} skipped ({} retries)",
            summary.succeeded, summary.failed, summary.skipped, summary.retried
        );

        Ok(summary)
    }
}

use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::ids::AppId;

const DETAILS_DIR: &str = "app_details";
const ERRORS_DIR: &str = "errors";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode record {id}: {source}")]
    Encode {
        id: String,
        source: serde_json::Error,
    },
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// Which subtree a record file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Details,
    Errors,
}

/// Bucket name for `id`: width 1000 puts 1..=1000 in "1-1000".
/// Id 0 falls into the first bucket; the last bucket is capped at `u128::MAX`.
pub fn shard_key(id: &AppId, width: u64) -> String {
    let width = u128::from(width.max(1));
    let start = (id.number().saturating_sub(1) / width) * width + 1;
    let end = start.saturating_add(width - 1);
    format!("{start}-{end}")
}

pub fn record_file_name(id: &AppId) -> String {
    format!("record_{id}.json")
}

/// Replace `path` with `bytes` via a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// One record file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: AppId,
    pub category: Category,
}

pub struct RecordStore {
    root: PathBuf,
    shard_width: u64,
    file_pattern: Regex,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, shard_width: u64) -> Self {
        Self {
            root: root.into(),
            shard_width,
            file_pattern: Regex::new(r"^record_(\d+)\.json$").expect("static pattern"),
        }
    }

    pub fn details_dir(&self) -> PathBuf {
        self.root.join(DETAILS_DIR)
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.details_dir().join(ERRORS_DIR)
    }

    pub fn record_path(&self, id: &AppId, category: Category) -> PathBuf {
        let base = match category {
            Category::Details => self.details_dir(),
            Category::Errors => self.errors_dir(),
        };
        base.join(shard_key(id, self.shard_width))
            .join(record_file_name(id))
    }

    /// Write the payload for `id`, replacing whatever was there.
    ///
    /// A success also removes an older error record for the id. An error
    /// never removes a stored success.
    pub fn persist(
        &self,
        id: &AppId,
        payload: &Value,
        category: Category,
    ) -> Result<PathBuf, StoreError> {
        let path = self.record_path(id, category);

        let json = serde_json::to_vec_pretty(payload).map_err(|source| StoreError::Encode {
            id: id.to_string(),
            source,
        })?;

        write_atomic(&path, &json).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;

        if category == Category::Details {
            let stale = self.record_path(id, Category::Errors);
            match fs::remove_file(&stale) {
                Ok(()) => debug!("Removed stale record {}", stale.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove stale record {}: {e}", stale.display()),
            }
        }

        Ok(path)
    }

    /// Every record file under the details tree, classified by subtree.
    pub fn scan(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let details_dir = self.details_dir();
        if !details_dir.exists() {
            return Ok(Vec::new());
        }

        let errors_dir = self.errors_dir();
        let mut records = Vec::new();

        for entry in WalkDir::new(&details_dir) {
            let entry = entry.map_err(|source| StoreError::Scan {
                path: details_dir.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(caps) = self.file_pattern.captures(name) else {
                continue;
            };
            let Ok(id) = caps[1].parse::<AppId>() else {
                continue;
            };

            let category = if entry.path().starts_with(&errors_dir) {
                Category::Errors
            } else {
                Category::Details
            };

            records.push(StoredRecord { id, category });
        }

        Ok(records)
    }
}

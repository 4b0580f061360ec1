use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::store;

#[derive(Debug, Error)]
#[error("not a numeric identifier: {0:?}")]
pub struct InvalidId(String);

/// Numeric identifier of one catalog record.
///
/// Keeps the text as read so log lines and file names round-trip exactly,
/// alongside the parsed value used for sharding and numeric ordering.
/// Values up to `u128::MAX` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppId {
    text: String,
    number: u128,
}

impl AppId {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn number(&self) -> u128 {
        self.number
    }
}

impl FromStr for AppId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidId(s.to_string()));
        }

        let number = text.parse().map_err(|_| InvalidId(s.to_string()))?;

        Ok(Self {
            text: text.to_string(),
            number,
        })
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for AppId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for AppId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Read ids in file order. Missing file yields an empty list.
pub fn read_ids(path: &Path) -> Result<Vec<AppId>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.parse::<AppId>() {
            Ok(id) => ids.push(id),
            Err(e) => warn!(path = %path.display(), line = line_no + 1, "skipping line: {e}"),
        }
    }

    Ok(ids)
}

pub fn read_id_set(path: &Path) -> Result<HashSet<AppId>> {
    Ok(read_ids(path)?.into_iter().collect())
}

/// Number of times each id occurs in the file.
pub fn count_occurrences(path: &Path) -> Result<HashMap<AppId, u32>> {
    let mut counts = HashMap::new();
    for id in read_ids(path)? {
        *counts.entry(id).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Write ids one per line, replacing the file atomically.
pub fn write_ids<'a>(path: &Path, ids: impl IntoIterator<Item = &'a AppId>) -> Result<()> {
    let mut body = String::new();
    for id in ids {
        body.push_str(id.as_str());
        body.push('\n');
    }
    store::write_atomic(path, body.as_bytes())?;
    Ok(())
}

// Union of every input, deduplicated and numerically sorted.
pub fn merge_id_files(inputs: &[&Path], output: &Path) -> Result<usize> {
    let mut merged = BTreeSet::new();

    for input in inputs {
        let ids = read_ids(input)?;
        info!("Read {} ids from {}", ids.len(), input.display());
        merged.extend(ids);
    }

    write_ids(output, &merged)?;
    info!("Merged {} unique ids into {}", merged.len(), output.display());

    Ok(merged.len())
}

/// Ids present in exactly one of the two files, numerically sorted.
pub fn diff_id_files(a: &Path, b: &Path) -> Result<Vec<AppId>> {
    let left: BTreeSet<AppId> = read_ids(a)?.into_iter().collect();
    let right: BTreeSet<AppId> = read_ids(b)?.into_iter().collect();

    Ok(left.symmetric_difference(&right).cloned().collect())
}

pub fn duplicate_ids(path: &Path) -> Result<BTreeMap<AppId, u32>> {
    Ok(count_occurrences(path)?
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .collect())
}

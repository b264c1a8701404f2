//! Accumulating profile dataset with atomic checkpoints.
//!
//! The store owns the whole lifecycle: `open → merge* → checkpoint*`. A
//! checkpoint rewrites the full dataset through a temp file in the same
//! directory and renames it over the target, so a crash mid-write leaves the
//! previous good snapshot intact. Opening an existing document seeds the
//! dedup index, which is what makes re-running an interrupted run safe.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::{normalize, ProfileRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Dataset I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt dataset document {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The durable, append-only record collection for one run.
///
/// Invariant: no two stored records share a normalized
/// `(name, searched_institution)` identity key.
pub struct ProfileStore {
    path: PathBuf,
    records: Vec<ProfileRecord>,
    seen: HashSet<(String, String)>,
}

impl ProfileStore {
    /// Open the store at `path`, loading any existing checkpoint document so
    /// previously collected records survive a restart.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records: Vec<ProfileRecord> = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            seen.insert(record.identity_key());
        }
        if !records.is_empty() {
            tracing::info!(
                path = %path.display(),
                existing = records.len(),
                "Resuming from existing dataset"
            );
        }

        Ok(Self {
            path,
            records,
            seen,
        })
    }

    /// Merge newly parsed records, skipping any whose identity key is
    /// already present. Returns how many were actually added.
    pub fn merge(&mut self, records: impl IntoIterator<Item = ProfileRecord>) -> usize {
        let mut added = 0;
        for record in records {
            if self.seen.insert(record.identity_key()) {
                self.records.push(record);
                added += 1;
            }
        }
        added
    }

    /// Serialize the full dataset atomically: write-to-temp-then-replace.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|source| self.io_err(source))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&parent).map_err(|source| self.io_err(source))?;
        serde_json::to_writer_pretty(&mut tmp, &self.records)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        tmp.flush().map_err(|source| self.io_err(source))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_err(e.error))?;

        tracing::debug!(
            path = %self.path.display(),
            records = self.records.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct records collected for one institution, by normalized match.
    pub fn count_for(&self, institution: &str) -> usize {
        let key = normalize(institution);
        self.records
            .iter()
            .filter(|r| normalize(&r.searched_institution) == key)
            .count()
    }

    /// Per-institution record counts for the run summary.
    pub fn counts_by_institution(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts
                .entry(record.searched_institution.clone())
                .or_insert(0) += 1;
        }
        counts
    }

    pub fn records(&self) -> &[ProfileRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

//! Version ledger: append-only per-path history.
//!
//! Rows are keyed by `(file_path, version)`, so a path's history is one
//! contiguous key range and its latest version is the last key in it.

use chrono::Utc;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{FileVersion, NewVersion};
use super::tables::*;

type VersionKey = (&'static str, u64);

/// Totals over the ledger, computed from one snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct LedgerStats {
    pub live_files: u64,
    pub versions: u64,
}

/// Highest-version row for `path` in whatever transaction owns `table`.
pub(crate) fn latest_in(
    table: &impl ReadableTable<VersionKey, &'static [u8]>,
    path: &str,
) -> Result<Option<FileVersion>, DatabaseError> {
    let mut range = table.range((path, 0u64)..=(path, u64::MAX))?;
    match range.next_back() {
        Some(entry) => {
            let (_, value) = entry?;
            Ok(Some(rmp_serde::from_slice(value.value())?))
        }
        None => Ok(None),
    }
}

/// `latest_in` for callers holding a write transaction. The ledger table is
/// released before returning so the caller may append afterwards.
pub(crate) fn latest_for_update(
    txn: &WriteTransaction,
    path: &str,
) -> Result<Option<FileVersion>, DatabaseError> {
    let table = txn.open_table(FILE_VERSIONS)?;
    latest_in(&table, path)
}

/// Allocate the next version for `new.file_path` and write its row.
///
/// Reading the current maximum and inserting happen in the caller's write
/// transaction. If the slot turns out to be occupied the caller gets
/// `VersionTaken` and must drop the transaction and allocate again.
pub(crate) fn append_in(
    txn: &WriteTransaction,
    new: NewVersion,
) -> Result<FileVersion, DatabaseError> {
    let mut table = txn.open_table(FILE_VERSIONS)?;
    let version = latest_in(&table, &new.file_path)?
        .map(|v| v.version)
        .unwrap_or(0)
        + 1;

    let row = FileVersion {
        file_path: new.file_path,
        version,
        blob_ref: new.blob_ref,
        size: new.size,
        content_hash: new.content_hash,
        author: new.author,
        message: new.message,
        is_tombstone: new.is_tombstone,
        created_at: Utc::now(),
    };

    let data = rmp_serde::to_vec_named(&row)?;
    let previous = table.insert((row.file_path.as_str(), version), data.as_slice())?;
    if previous.is_some() {
        return Err(DatabaseError::VersionTaken {
            path: row.file_path.clone(),
            version,
        });
    }
    Ok(row)
}

/// Latest row per path, tombstones dropped, for every path under `prefix`.
fn current_in(
    table: &impl ReadableTable<VersionKey, &'static [u8]>,
    prefix: &str,
) -> Result<Vec<FileVersion>, DatabaseError> {
    let mut current: Vec<FileVersion> = Vec::new();
    let mut last: Option<FileVersion> = None;

    for entry in table.range((prefix, 0u64)..)? {
        let (key, value) = entry?;
        let (path, _) = key.value();
        if !path.starts_with(prefix) {
            break;
        }
        let row: FileVersion = rmp_serde::from_slice(value.value())?;
        if let Some(prev) = last.take() {
            if prev.file_path != row.file_path && !prev.is_tombstone {
                current.push(prev);
            }
        }
        last = Some(row);
    }
    if let Some(prev) = last {
        if !prev.is_tombstone {
            current.push(prev);
        }
    }

    Ok(current)
}

impl Database {
    // ========================================================================
    // Ledger reads
    // ========================================================================

    /// Highest committed version for a path, tombstone or not
    pub fn latest_version(&self, path: &str) -> Result<Option<FileVersion>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILE_VERSIONS)?;
        latest_in(&table, path)
    }

    /// A specific version of a path
    pub fn get_version(&self, path: &str, version: u64) -> Result<Option<FileVersion>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILE_VERSIONS)?;

        match table.get((path, version))? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Every version of a path, newest first. Empty if never versioned.
    pub fn history(&self, path: &str) -> Result<Vec<FileVersion>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILE_VERSIONS)?;

        let mut versions = Vec::new();
        for entry in table.range((path, 0u64)..=(path, u64::MAX))?.rev() {
            let (_, value) = entry?;
            versions.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(versions)
    }

    /// The version number the next append for `path` would receive.
    /// Informational only: `append_version` allocates inside its own write.
    pub fn next_version(&self, path: &str) -> Result<u64, DatabaseError> {
        Ok(self.latest_version(path)?.map(|v| v.version).unwrap_or(0) + 1)
    }

    // ========================================================================
    // Ledger writes
    // ========================================================================

    /// Allocate the next version and append one immutable row.
    pub fn append_version(&self, new: NewVersion) -> Result<FileVersion, DatabaseError> {
        self.write(|txn| append_in(txn, new))
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    /// Files that currently exist (latest version is not a tombstone) whose
    /// path starts with `prefix`, ordered by path. One read snapshot.
    pub fn current_files(&self, prefix: &str) -> Result<Vec<FileVersion>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILE_VERSIONS)?;
        current_in(&table, prefix)
    }

    /// Case-insensitive substring match over current file paths
    pub fn search_current(&self, query: &str, limit: usize) -> Result<Vec<FileVersion>, DatabaseError> {
        let needle = query.to_lowercase();
        Ok(self
            .current_files("")?
            .into_iter()
            .filter(|v| v.file_path.to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }

    pub fn ledger_stats(&self) -> Result<LedgerStats, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILE_VERSIONS)?;
        Ok(LedgerStats {
            live_files: current_in(&table, "")?.len() as u64,
            versions: table.len()?,
        })
    }
}

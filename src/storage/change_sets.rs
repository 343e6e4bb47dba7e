use redb::{ReadableTable, WriteTransaction};

use super::db::{next_id, Database, DatabaseError};
use super::models::{ChangeSet, ChangeSetStatus};
use super::tables::*;

/// Load a change set inside a write transaction.
pub(crate) fn load_in(txn: &WriteTransaction, id: u64) -> Result<Option<ChangeSet>, DatabaseError> {
    let table = txn.open_table(CHANGE_SETS)?;
    let result = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

/// Persist a change set and keep the author index current.
pub(crate) fn save_in(txn: &WriteTransaction, change_set: &ChangeSet) -> Result<(), DatabaseError> {
    debug_assert!(change_set.id > 0, "change set id must be allocated");

    let mut table = txn.open_table(CHANGE_SETS)?;
    let data = rmp_serde::to_vec_named(change_set)?;
    table.insert(change_set.id, data.as_slice())?;

    let mut author_table = txn.open_table(AUTHOR_CHANGE_SETS)?;
    let mut ids: Vec<u64> = match author_table.get(change_set.author.as_str())? {
        Some(v) => rmp_serde::from_slice(v.value())?,
        None => Vec::new(),
    };
    if !ids.contains(&change_set.id) {
        ids.push(change_set.id);
        let index_data = rmp_serde::to_vec_named(&ids)?;
        author_table.insert(change_set.author.as_str(), index_data.as_slice())?;
    }
    Ok(())
}

/// Allocate an id for a new change set.
pub(crate) fn allocate_id(txn: &WriteTransaction) -> Result<u64, DatabaseError> {
    next_id(txn, "change_sets")
}

/// Allocate an id for a new staged operation.
pub(crate) fn allocate_operation_id(txn: &WriteTransaction) -> Result<u64, DatabaseError> {
    next_id(txn, "staged_operations")
}

/// The author's most recently updated draft, if any.
pub(crate) fn latest_draft_in(
    txn: &WriteTransaction,
    author: &str,
) -> Result<Option<ChangeSet>, DatabaseError> {
    let ids: Vec<u64> = {
        let author_table = txn.open_table(AUTHOR_CHANGE_SETS)?;
        let result = match author_table.get(author)? {
            Some(v) => rmp_serde::from_slice(v.value())?,
            None => Vec::new(),
        };
        result
    };

    let table = txn.open_table(CHANGE_SETS)?;
    let mut latest: Option<ChangeSet> = None;
    for id in ids {
        if let Some(data) = table.get(id)? {
            let change_set: ChangeSet = rmp_serde::from_slice(data.value())?;
            if change_set.status != ChangeSetStatus::Draft {
                continue;
            }
            let newer = latest
                .as_ref()
                .map_or(true, |l| change_set.updated_at > l.updated_at);
            if newer {
                latest = Some(change_set);
            }
        }
    }
    Ok(latest)
}

/// Filters for listing change sets
#[derive(Debug, Default, Clone)]
pub struct ChangeSetFilter {
    pub status: Option<ChangeSetStatus>,
    pub author: Option<String>,
}

impl Database {
    // ========================================================================
    // Change set reads
    // ========================================================================

    pub fn get_change_set(&self, id: u64) -> Result<Option<ChangeSet>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHANGE_SETS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Change sets matching `filter`, most recently updated first
    pub fn list_change_sets(&self, filter: &ChangeSetFilter) -> Result<Vec<ChangeSet>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHANGE_SETS)?;

        // Use the author index when filtering by author
        let ids: Option<Vec<u64>> = match filter.author {
            Some(ref author) => {
                let author_table = read_txn.open_table(AUTHOR_CHANGE_SETS)?;
                let result = match author_table.get(author.as_str())? {
                    Some(data) => rmp_serde::from_slice(data.value())?,
                    None => Vec::new(),
                };
                Some(result)
            }
            None => None,
        };

        let mut change_sets: Vec<ChangeSet> = Vec::new();
        match ids {
            Some(ids) => {
                for id in ids {
                    if let Some(data) = table.get(id)? {
                        change_sets.push(rmp_serde::from_slice(data.value())?);
                    }
                }
            }
            None => {
                for result in table.iter()? {
                    let (_, value) = result?;
                    change_sets.push(rmp_serde::from_slice(value.value())?);
                }
            }
        }

        if let Some(status) = filter.status {
            change_sets.retain(|cs| cs.status == status);
        }
        change_sets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(change_sets)
    }

    /// Count change sets, optionally only those in `status`
    pub fn count_change_sets(&self, status: Option<ChangeSetStatus>) -> Result<u64, DatabaseError> {
        let filter = ChangeSetFilter {
            status,
            author: None,
        };
        Ok(self.list_change_sets(&filter)?.len() as u64)
    }
}

use chrono::Utc;
use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::SharingRecord;
use super::tables::*;

/// Which flag of a sharing record to flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareFlag {
    Public,
    Archived,
}

/// Existing record for `path`, or a fresh private, unarchived one with a new
/// token. The fresh record is written (and its token indexed) in `txn`.
pub(crate) fn get_or_create_in(
    txn: &WriteTransaction,
    path: &str,
    actor: &str,
) -> Result<SharingRecord, DatabaseError> {
    let existing: Option<SharingRecord> = {
        let table = txn.open_table(SHARES)?;
        let result = match table.get(path)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        result
    };
    if let Some(record) = existing {
        return Ok(record);
    }

    let now = Utc::now();
    let record = SharingRecord {
        file_path: path.to_string(),
        token: uuid::Uuid::new_v4().simple().to_string(),
        is_public: false,
        is_archived: false,
        created_by: actor.to_string(),
        created_at: now,
        updated_at: now,
    };
    put_in(txn, &record)?;
    Ok(record)
}

fn put_in(txn: &WriteTransaction, record: &SharingRecord) -> Result<(), DatabaseError> {
    let mut table = txn.open_table(SHARES)?;
    let data = rmp_serde::to_vec_named(record)?;
    table.insert(record.file_path.as_str(), data.as_slice())?;

    let mut token_table = txn.open_table(SHARE_TOKENS)?;
    token_table.insert(record.token.as_str(), record.file_path.as_str())?;
    Ok(())
}

impl Database {
    // ========================================================================
    // Sharing registry
    // ========================================================================

    pub fn get_share(&self, path: &str) -> Result<Option<SharingRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SHARES)?;

        match table.get(path)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a public token (token -> path -> record)
    pub fn get_share_by_token(&self, token: &str) -> Result<Option<SharingRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let token_table = read_txn.open_table(SHARE_TOKENS)?;

        let path = match token_table.get(token)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(SHARES)?;
        match table.get(path.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Sharing records for the given paths, skipping paths without one
    pub fn get_shares(&self, paths: &[String]) -> Result<Vec<SharingRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SHARES)?;

        let mut records = Vec::new();
        for path in paths {
            if let Some(data) = table.get(path.as_str())? {
                records.push(rmp_serde::from_slice(data.value())?);
            }
        }
        Ok(records)
    }

    pub fn get_or_create_share(&self, path: &str, actor: &str) -> Result<SharingRecord, DatabaseError> {
        self.write(|txn| get_or_create_in(txn, path, actor))
    }

    /// Flip one flag, creating the record on first use. The token never
    /// changes once issued.
    pub fn toggle_share(
        &self,
        path: &str,
        actor: &str,
        flag: ShareFlag,
    ) -> Result<SharingRecord, DatabaseError> {
        self.write(|txn| {
            let mut record = get_or_create_in(txn, path, actor)?;
            match flag {
                ShareFlag::Public => record.is_public = !record.is_public,
                ShareFlag::Archived => record.is_archived = !record.is_archived,
            }
            record.updated_at = Utc::now();
            put_in(txn, &record)?;
            Ok(record)
        })
    }
}

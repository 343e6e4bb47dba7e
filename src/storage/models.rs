use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hash recorded on tombstone versions, which carry no blob.
pub const TOMBSTONE_HASH: &str = "deleted";

/// An immutable ledger row: `blob_ref` held these bytes for `file_path` at
/// `version`. Never updated or removed once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    pub file_path: String,
    pub version: u64,
    /// Permanent `_versions/` key; empty for tombstones
    pub blob_ref: String,
    pub size: u64,
    /// Hex SHA-256 of the blob, or [`TOMBSTONE_HASH`]
    pub content_hash: String,
    pub author: String,
    pub message: String,
    pub is_tombstone: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything about a version except the number, which the ledger allocates.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub file_path: String,
    pub blob_ref: String,
    pub size: u64,
    pub content_hash: String,
    pub author: String,
    pub message: String,
    pub is_tombstone: bool,
}

impl NewVersion {
    pub fn tombstone(file_path: &str, author: &str, message: String) -> Self {
        Self {
            file_path: file_path.to_string(),
            blob_ref: String::new(),
            size: 0,
            content_hash: TOMBSTONE_HASH.to_string(),
            author: author.to_string(),
            message,
            is_tombstone: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Merged,
    Closed,
}

impl ChangeSetStatus {
    /// Staged operations and metadata may only change in these states.
    pub fn is_editable(self) -> bool {
        matches!(self, ChangeSetStatus::Draft | ChangeSetStatus::Rejected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChangeSetStatus::Merged | ChangeSetStatus::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSetStatus::Draft => "draft",
            ChangeSetStatus::PendingReview => "pending_review",
            ChangeSetStatus::Approved => "approved",
            ChangeSetStatus::Rejected => "rejected",
            ChangeSetStatus::Merged => "merged",
            ChangeSetStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Edit,
    Delete,
}

impl OperationKind {
    pub fn carries_content(self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Edit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Edit => "edit",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending mutation inside a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedOperation {
    pub id: u64,
    pub file_path: String,
    pub kind: OperationKind,
    /// `_staging/` key; `None` for deletes
    pub staged_key: Option<String>,
    /// Version the author started from. Weak: not re-checked until merge,
    /// and only then in strict mode.
    pub base_version: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// Set once merge has appended this operation to the ledger
    #[serde(default)]
    pub committed_version: Option<u64>,
}

/// A reviewable bundle of staged operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub status: ChangeSetStatus,
    pub author: String,
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub review_comment: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Merge order is this vector's order
    #[serde(default)]
    pub operations: Vec<StagedOperation>,
}

impl ChangeSet {
    pub fn operation(&self, op_id: u64) -> Option<&StagedOperation> {
        self.operations.iter().find(|op| op.id == op_id)
    }

    /// Staged blob keys still owned by this change set
    pub fn staged_keys(&self) -> Vec<String> {
        self.operations
            .iter()
            .filter(|op| op.committed_version.is_none())
            .filter_map(|op| op.staged_key.clone())
            .collect()
    }
}

/// Public-link and archive state for one canonical path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingRecord {
    pub file_path: String,
    pub token: String,
    pub is_public: bool,
    pub is_archived: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

use bytes::Bytes;
use chrono::Utc;
use redb::WriteTransaction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{require, Vault, VaultError, VaultResult};
use crate::access::{Actor, Capability};
use crate::audit::AuditEvent;
use crate::diff::FileDiff;
use crate::keys;
use crate::object_store::ObjectStoreError;
use crate::storage::change_sets::{
    allocate_id, allocate_operation_id, latest_draft_in, load_in, save_in,
};
use crate::storage::models::{
    ChangeSet, ChangeSetStatus, FileVersion, NewVersion, OperationKind, StagedOperation,
};
use crate::storage::versions::{append_in, latest_for_update};
use crate::storage::{ChangeSetFilter, DatabaseError};

const AUTO_DRAFT_PREFIX: &str = "Changes by ";
const AUTO_DRAFT_DESCRIPTION: &str = "Auto-created draft. Edit the title before submitting.";
const CONTENT_UNAVAILABLE: &str = "[Content unavailable]";
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Which change set a staged mutation lands in.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target {
    ChangeSet(u64),
    /// The actor's most recently updated draft, created on demand
    Draft,
}

/// `Content` resolves to create or edit depending on whether the path is
/// live when the stage commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    Content,
    Explicit(OperationKind),
}

pub(crate) struct StageEntry {
    pub file_path: String,
    pub intent: Intent,
    pub content: Option<Bytes>,
}

/// Result of staging: the change set as committed and the operations this
/// request added to it.
#[derive(Debug, Clone, Serialize)]
pub struct Staged {
    pub change_set: ChangeSet,
    pub operations: Vec<StagedOperation>,
    pub auto_created: bool,
}

struct StageOutcome {
    change_set: ChangeSet,
    staged: Vec<StagedOperation>,
    replaced: Vec<String>,
    auto_created: bool,
}

fn missing(id: u64) -> VaultError {
    VaultError::NotFound(format!("Change set #{id} not found"))
}

fn new_change_set(id: u64, title: String, description: String, author: &str) -> ChangeSet {
    let now = Utc::now();
    ChangeSet {
        id,
        title,
        description,
        status: ChangeSetStatus::Draft,
        author: author.to_string(),
        reviewer: None,
        review_comment: None,
        reviewed_at: None,
        merged_at: None,
        created_at: now,
        updated_at: now,
        operations: Vec::new(),
    }
}

fn ensure_editable(change_set: &ChangeSet, actor: &Actor) -> VaultResult<()> {
    if !actor.owns_or_admin(&change_set.author) {
        return Err(VaultError::PermissionDenied(format!(
            "Only the author or an admin may modify change set #{}",
            change_set.id
        )));
    }
    if !change_set.status.is_editable() {
        return Err(VaultError::Conflict(format!(
            "Change set #{} is {} and can no longer be modified",
            change_set.id, change_set.status
        )));
    }
    Ok(())
}

fn version_label(version: Option<u64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| format!("v{v}"))
}

/// How `op` diverged from the path's live version, if it did.
fn stale_base(op: &StagedOperation, live: Option<u64>) -> Option<String> {
    let expected = match op.kind {
        OperationKind::Create => None,
        OperationKind::Edit | OperationKind::Delete => op.base_version,
    };
    (live != expected).then(|| {
        format!(
            "{} (staged against {}, latest is {})",
            op.file_path,
            version_label(expected),
            version_label(live)
        )
    })
}

fn out_of_date(id: u64, stale: &[String]) -> VaultError {
    VaultError::Conflict(format!(
        "Change set #{id} is out of date: {}",
        stale.join(", ")
    ))
}

/// Resolve the target change set and upsert one operation per entry, all in
/// the caller's write transaction.
fn stage_in(
    txn: &WriteTransaction,
    actor: &Actor,
    target: Target,
    entries: &[(String, Intent, Option<String>)],
    message: Option<&str>,
) -> VaultResult<StageOutcome> {
    let (mut change_set, auto_created) = match target {
        Target::ChangeSet(id) => {
            let change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            ensure_editable(&change_set, actor)?;
            (change_set, false)
        }
        Target::Draft => match latest_draft_in(txn, &actor.id)? {
            Some(draft) => (draft, false),
            None => {
                let draft = new_change_set(
                    allocate_id(txn)?,
                    format!("{AUTO_DRAFT_PREFIX}{}", actor.id),
                    AUTO_DRAFT_DESCRIPTION.to_string(),
                    &actor.id,
                );
                (draft, true)
            }
        },
    };

    if matches!(target, Target::Draft) {
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        if let Some(message) = message {
            if change_set.title.starts_with(AUTO_DRAFT_PREFIX) {
                change_set.title = message.to_string();
            }
        }
    }

    let now = Utc::now();
    let mut staged = Vec::with_capacity(entries.len());
    let mut replaced = Vec::new();

    for (file_path, intent, staged_key) in entries {
        let live = latest_for_update(txn, file_path)?.filter(|v| !v.is_tombstone);
        let kind = match intent {
            Intent::Content if live.is_some() => OperationKind::Edit,
            Intent::Content => OperationKind::Create,
            Intent::Explicit(kind) => *kind,
        };
        let base_version = match kind {
            OperationKind::Create => None,
            OperationKind::Edit => Some(
                live.as_ref()
                    .ok_or_else(|| {
                        VaultError::NotFound(format!(
                            "'{file_path}' has no live version to edit; use create"
                        ))
                    })?
                    .version,
            ),
            OperationKind::Delete => Some(
                live.as_ref()
                    .ok_or_else(|| VaultError::NotFound(format!("'{file_path}' does not exist")))?
                    .version,
            ),
        };

        // One operation per path: the newest replaces the previous one
        if let Some(idx) = change_set
            .operations
            .iter()
            .position(|op| &op.file_path == file_path)
        {
            let previous = change_set.operations.remove(idx);
            replaced.extend(previous.staged_key);
        }

        let operation = StagedOperation {
            id: allocate_operation_id(txn)?,
            file_path: file_path.clone(),
            kind,
            staged_key: staged_key.clone(),
            base_version,
            created_at: now,
            committed_version: None,
        };
        change_set.operations.push(operation.clone());
        staged.push(operation);
    }

    change_set.updated_at = now;
    save_in(txn, &change_set)?;

    Ok(StageOutcome {
        change_set,
        staged,
        replaced,
        auto_created,
    })
}

impl Vault {
    // ========================================================================
    // Change set metadata
    // ========================================================================

    pub fn create_change_set(
        &self,
        actor: &Actor,
        title: &str,
        description: &str,
    ) -> VaultResult<ChangeSet> {
        require(actor, Capability::Write)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(VaultError::Invalid("Title is required".to_string()));
        }

        let change_set = self.db.write(|txn| {
            let change_set = new_change_set(
                allocate_id(txn)?,
                title.to_string(),
                description.trim().to_string(),
                &actor.id,
            );
            save_in(txn, &change_set)?;
            Ok::<_, VaultError>(change_set)
        })?;

        self.emit(
            AuditEvent::new(&actor.id, "cr.create", "change_set", change_set.id.to_string())
                .detail("title", change_set.title.clone()),
        );
        Ok(change_set)
    }

    pub fn update_change_set(
        &self,
        actor: &Actor,
        id: u64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> VaultResult<ChangeSet> {
        let title = match title.map(str::trim) {
            Some("") => return Err(VaultError::Invalid("Title must not be blank".to_string())),
            other => other,
        };

        let change_set = self.db.write(|txn| {
            let mut change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            ensure_editable(&change_set, actor)?;
            if let Some(title) = title {
                change_set.title = title.to_string();
            }
            if let Some(description) = description {
                change_set.description = description.trim().to_string();
            }
            change_set.updated_at = Utc::now();
            save_in(txn, &change_set)?;
            Ok::<_, VaultError>(change_set)
        })?;

        self.emit(AuditEvent::new(&actor.id, "cr.update", "change_set", id.to_string()));
        Ok(change_set)
    }

    pub fn get_change_set(&self, id: u64) -> VaultResult<ChangeSet> {
        self.db.get_change_set(id)?.ok_or_else(|| missing(id))
    }

    /// One page of change sets, most recently updated first, with the total
    /// number matching `filter`.
    pub fn list_change_sets(
        &self,
        filter: &ChangeSetFilter,
        limit: usize,
        offset: usize,
    ) -> VaultResult<(Vec<ChangeSet>, u64)> {
        let all = self.db.list_change_sets(filter)?;
        let total = all.len() as u64;
        let page = all.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Upload staged content, then record the operations in one transaction.
    /// Uploaded blobs are discarded if the transaction fails.
    pub(crate) async fn stage_batch(
        &self,
        actor: &Actor,
        target: Target,
        entries: Vec<StageEntry>,
        message: Option<&str>,
    ) -> VaultResult<Staged> {
        // Fail fast before uploading anything
        if let Target::ChangeSet(id) = target {
            let change_set = self.get_change_set(id)?;
            ensure_editable(&change_set, actor)?;
        }

        let mut uploaded: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let staged_key = match entry.content {
                Some(data) => {
                    let key = keys::staging_key();
                    let content_type = keys::content_type(&entry.file_path);
                    if let Err(e) = self.store.put(&key, data, &content_type).await {
                        for key in &uploaded {
                            self.discard_blob(key).await;
                        }
                        return Err(e.into());
                    }
                    uploaded.push(key.clone());
                    Some(key)
                }
                None => None,
            };
            rows.push((entry.file_path, entry.intent, staged_key));
        }

        let outcome = match self
            .db
            .write(|txn| stage_in(txn, actor, target, &rows, message))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                for key in &uploaded {
                    self.discard_blob(key).await;
                }
                return Err(e);
            }
        };

        for key in &outcome.replaced {
            self.discard_blob(key).await;
        }

        if outcome.auto_created {
            self.emit(
                AuditEvent::new(
                    &actor.id,
                    "cr.auto_create",
                    "change_set",
                    outcome.change_set.id.to_string(),
                )
                .detail("title", outcome.change_set.title.clone()),
            );
        }

        debug!(
            change_set = outcome.change_set.id,
            staged = outcome.staged.len(),
            replaced = outcome.replaced.len(),
            "Staged operations"
        );

        Ok(Staged {
            change_set: outcome.change_set,
            operations: outcome.staged,
            auto_created: outcome.auto_created,
        })
    }

    /// Stage one operation into a specific change set.
    pub async fn add_operation(
        &self,
        actor: &Actor,
        id: u64,
        path: &str,
        kind: OperationKind,
        content: Option<Bytes>,
    ) -> VaultResult<Staged> {
        let file_path = keys::user_path(path)?;
        let content = match (kind.carries_content(), content) {
            (true, Some(data)) => Some(data),
            (true, None) => {
                return Err(VaultError::Invalid(format!(
                    "Content is required for a {kind} operation"
                )))
            }
            (false, _) => None,
        };

        let staged = self
            .stage_batch(
                actor,
                Target::ChangeSet(id),
                vec![StageEntry {
                    file_path: file_path.clone(),
                    intent: Intent::Explicit(kind),
                    content,
                }],
                None,
            )
            .await?;

        self.emit(
            AuditEvent::new(&actor.id, "cr.stage", "change_set", id.to_string())
                .detail("file_path", file_path)
                .detail("operation", kind.as_str()),
        );
        Ok(staged)
    }

    /// Remove a staged operation and discard its blob. A second call for the
    /// same operation finds nothing and deletes nothing.
    pub async fn remove_operation(
        &self,
        actor: &Actor,
        id: u64,
        op_id: u64,
    ) -> VaultResult<StagedOperation> {
        let removed = self.db.write(|txn| {
            let mut change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            ensure_editable(&change_set, actor)?;
            let idx = change_set
                .operations
                .iter()
                .position(|op| op.id == op_id)
                .ok_or_else(|| {
                    VaultError::NotFound(format!("Operation {op_id} not found in change set #{id}"))
                })?;
            let removed = change_set.operations.remove(idx);
            change_set.updated_at = Utc::now();
            save_in(txn, &change_set)?;
            Ok::<_, VaultError>(removed)
        })?;

        if let Some(ref key) = removed.staged_key {
            self.discard_blob(key).await;
        }

        self.emit(
            AuditEvent::new(&actor.id, "cr.unstage", "change_set", id.to_string())
                .detail("file_path", removed.file_path.clone())
                .detail("operation", removed.kind.as_str()),
        );
        Ok(removed)
    }

    /// Base content (empty for creates) against staged content (empty for
    /// deletes).
    pub async fn operation_diff(&self, id: u64, op_id: u64) -> VaultResult<FileDiff> {
        let change_set = self.get_change_set(id)?;
        let op = change_set.operation(op_id).ok_or_else(|| {
            VaultError::NotFound(format!("Operation {op_id} not found in change set #{id}"))
        })?;

        let (old_label, old_content) = match op.base_version {
            Some(version) if op.kind != OperationKind::Create => (
                format!("{} (v{version})", op.file_path),
                self.version_text(&op.file_path, version).await,
            ),
            _ => ("Empty".to_string(), String::new()),
        };
        let (new_label, new_content) = match op.staged_key {
            Some(ref key) => ("Proposed".to_string(), self.blob_text(key).await),
            None => ("Deleted".to_string(), String::new()),
        };

        Ok(FileDiff::compute(old_label, new_label, old_content, new_content))
    }

    async fn blob_text(&self, key: &str) -> String {
        match self.store.get(key).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(e) => {
                debug!(key = %key, error = %e, "Blob unreadable for diff");
                CONTENT_UNAVAILABLE.to_string()
            }
        }
    }

    async fn version_text(&self, path: &str, version: u64) -> String {
        match self.db.get_version(path, version) {
            Ok(Some(row)) if !row.is_tombstone => self.blob_text(&row.blob_ref).await,
            _ => CONTENT_UNAVAILABLE.to_string(),
        }
    }

    // ========================================================================
    // Review workflow
    // ========================================================================

    pub fn submit(&self, actor: &Actor, id: u64) -> VaultResult<ChangeSet> {
        let change_set = self.db.write(|txn| {
            let mut change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            ensure_editable(&change_set, actor)?;
            if change_set.operations.is_empty() {
                return Err(VaultError::Conflict(format!(
                    "Change set #{id} has no staged operations"
                )));
            }
            change_set.status = ChangeSetStatus::PendingReview;
            change_set.reviewer = None;
            change_set.review_comment = None;
            change_set.reviewed_at = None;
            change_set.updated_at = Utc::now();
            save_in(txn, &change_set)?;
            Ok(change_set)
        })?;

        self.emit(
            AuditEvent::new(&actor.id, "cr.submit", "change_set", id.to_string())
                .detail("file_count", change_set.operations.len()),
        );
        Ok(change_set)
    }

    pub fn review(
        &self,
        actor: &Actor,
        id: u64,
        decision: ReviewDecision,
        comment: Option<&str>,
    ) -> VaultResult<ChangeSet> {
        require(actor, Capability::Review)?;

        let change_set = self.db.write(|txn| {
            let mut change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            if change_set.status != ChangeSetStatus::PendingReview {
                return Err(VaultError::Conflict(format!(
                    "Change set #{id} is {}, not pending review",
                    change_set.status
                )));
            }
            if !actor.may_review_work_of(&change_set.author) {
                return Err(VaultError::Conflict(
                    "You cannot review your own change set".to_string(),
                ));
            }

            let now = Utc::now();
            change_set.status = match decision {
                ReviewDecision::Approve => ChangeSetStatus::Approved,
                ReviewDecision::Reject => ChangeSetStatus::Rejected,
            };
            change_set.reviewer = Some(actor.id.clone());
            change_set.review_comment = comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            change_set.reviewed_at = Some(now);
            change_set.updated_at = now;
            save_in(txn, &change_set)?;
            Ok(change_set)
        })?;

        let action = match decision {
            ReviewDecision::Approve => "cr.approve",
            ReviewDecision::Reject => "cr.reject",
        };
        let mut event = AuditEvent::new(&actor.id, action, "change_set", id.to_string());
        if let Some(ref comment) = change_set.review_comment {
            event = event.detail("comment", comment.clone());
        }
        self.emit(event);
        Ok(change_set)
    }

    /// Apply every pending operation to the ledger and canonical namespace,
    /// in operation order, then mark the change set merged.
    ///
    /// Each operation commits in its own transaction and records the version
    /// it produced. A merge interrupted partway can be re-run: committed
    /// operations are skipped.
    pub async fn merge(&self, actor: &Actor, id: u64) -> VaultResult<ChangeSet> {
        require(actor, Capability::Write)?;

        let change_set = self.get_change_set(id)?;
        if change_set.status != ChangeSetStatus::Approved {
            return Err(VaultError::Conflict(format!(
                "Change set #{id} is {}; only approved change sets can be merged",
                change_set.status
            )));
        }
        if self.strict_merge {
            self.check_bases(&change_set)?;
        }

        for op in change_set
            .operations
            .iter()
            .filter(|op| op.committed_version.is_none())
        {
            self.commit_operation(&change_set, op).await?;
        }

        let merged = self.db.write(|txn| {
            let mut change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            if change_set.status != ChangeSetStatus::Approved {
                return Err(VaultError::Conflict(format!(
                    "Change set #{id} became {} during merge",
                    change_set.status
                )));
            }
            let now = Utc::now();
            change_set.status = ChangeSetStatus::Merged;
            change_set.merged_at = Some(now);
            change_set.updated_at = now;
            save_in(txn, &change_set)?;
            Ok(change_set)
        })?;

        info!(
            change_set = id,
            files = merged.operations.len(),
            merged_by = %actor.id,
            "Merged change set"
        );
        self.emit(
            AuditEvent::new(&actor.id, "cr.merge", "change_set", id.to_string())
                .detail("file_count", merged.operations.len()),
        );
        Ok(merged)
    }

    /// Strict mode: every pending operation must still start from the
    /// path's latest live version (creates: the path must not be live).
    /// The same check runs again inside each commit transaction.
    fn check_bases(&self, change_set: &ChangeSet) -> VaultResult<()> {
        let mut stale = Vec::new();
        for op in change_set
            .operations
            .iter()
            .filter(|op| op.committed_version.is_none())
        {
            let live = self
                .db
                .latest_version(&op.file_path)?
                .filter(|v| !v.is_tombstone)
                .map(|v| v.version);
            stale.extend(stale_base(op, live));
        }

        if stale.is_empty() {
            Ok(())
        } else {
            Err(out_of_date(change_set.id, &stale))
        }
    }

    fn operation_committed(&self, change_set_id: u64, op_id: u64) -> VaultResult<bool> {
        Ok(self
            .get_change_set(change_set_id)?
            .operation(op_id)
            .is_some_and(|op| op.committed_version.is_some()))
    }

    /// Commit one operation. The ledger row is appended first; the canonical
    /// key is only published once the row exists.
    async fn commit_operation(&self, change_set: &ChangeSet, op: &StagedOperation) -> VaultResult<()> {
        let path = op.file_path.as_str();

        if op.kind == OperationKind::Delete {
            let tombstone = NewVersion::tombstone(
                path,
                &change_set.author,
                format!("CR #{}: Delete {path}", change_set.id),
            );
            if let Some(row) = self.record_commit(change_set.id, op.id, tombstone)? {
                debug!(path = %path, version = row.version, "Committed tombstone");
                self.discard_blob(path).await;
                self.resync_if_superseded(path, row.version).await;
            }
            return Ok(());
        }

        let staged_key = op.staged_key.as_deref().ok_or_else(|| {
            VaultError::Conflict(format!("Operation {} has no staged content", op.id))
        })?;
        let data = match self.store.get(staged_key).await {
            Ok(data) => data,
            // A concurrent merge committed this operation and dropped the blob
            Err(ObjectStoreError::NotFound(_))
                if self.operation_committed(change_set.id, op.id)? =>
            {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let content_type = keys::content_type(path);
        let blob_ref = keys::version_key();

        self.store.put(&blob_ref, data.clone(), &content_type).await?;

        let new = NewVersion {
            file_path: path.to_string(),
            blob_ref: blob_ref.clone(),
            size: data.len() as u64,
            content_hash: keys::content_hash(&data),
            author: change_set.author.clone(),
            message: format!("CR #{}: {}", change_set.id, change_set.title),
            is_tombstone: false,
        };

        let row = match self.record_commit(change_set.id, op.id, new) {
            Ok(Some(row)) => row,
            // A concurrent merge committed this operation first
            Ok(None) => {
                self.discard_blob(&blob_ref).await;
                return Ok(());
            }
            Err(e) => {
                self.discard_blob(&blob_ref).await;
                return Err(e);
            }
        };
        debug!(path = %path, version = row.version, "Committed version");

        self.discard_blob(staged_key).await;
        if let Err(e) = self.store.put(path, data, &content_type).await {
            // Reads fall back to the version blob
            warn!(path = %path, error = %e, "Failed to publish canonical content");
            return Ok(());
        }
        self.resync_if_superseded(path, row.version).await;
        Ok(())
    }

    /// Re-publish the canonical key from the ledger when a later version of
    /// `path` was committed while this merge was writing it.
    async fn resync_if_superseded(&self, path: &str, committed: u64) {
        let latest = match self.db.latest_version(path) {
            Ok(Some(latest)) if latest.version != committed => latest,
            Ok(_) => return,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to re-check latest version");
                return;
            }
        };
        if latest.is_tombstone {
            self.discard_blob(path).await;
            return;
        }
        let restored = match self.store.get(&latest.blob_ref).await {
            Ok(data) => self.store.put(path, data, &keys::content_type(path)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            warn!(path = %path, version = latest.version, error = %e, "Failed to resync canonical content");
        }
    }

    /// Append the version for one operation and mark the operation committed.
    /// Returns `None` if the operation was already committed.
    fn record_commit(
        &self,
        change_set_id: u64,
        op_id: u64,
        new: NewVersion,
    ) -> VaultResult<Option<FileVersion>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.db.write(|txn| {
                let mut change_set =
                    load_in(txn, change_set_id)?.ok_or_else(|| missing(change_set_id))?;
                if change_set.status != ChangeSetStatus::Approved {
                    return Err(VaultError::Conflict(format!(
                        "Change set #{change_set_id} became {} during merge",
                        change_set.status
                    )));
                }
                let Some(op) = change_set.operations.iter_mut().find(|op| op.id == op_id) else {
                    return Err(VaultError::NotFound(format!(
                        "Operation {op_id} was removed during merge"
                    )));
                };
                if op.committed_version.is_some() {
                    return Ok(None);
                }
                if self.strict_merge {
                    let live = latest_for_update(txn, &op.file_path)?
                        .filter(|v| !v.is_tombstone)
                        .map(|v| v.version);
                    if let Some(stale) = stale_base(op, live) {
                        return Err(out_of_date(change_set_id, &[stale]));
                    }
                }

                let row = append_in(txn, new.clone())?;
                op.committed_version = Some(row.version);
                save_in(txn, &change_set)?;
                Ok(Some(row))
            });

            match result {
                Err(VaultError::Database(DatabaseError::VersionTaken { path, version }))
                    if attempt < MAX_ALLOCATION_ATTEMPTS =>
                {
                    warn!(path = %path, version, attempt, "Version slot taken, reallocating");
                }
                other => return other,
            }
        }
    }

    pub async fn close(&self, actor: &Actor, id: u64) -> VaultResult<ChangeSet> {
        let (change_set, discarded) = self.db.write(|txn| {
            let mut change_set = load_in(txn, id)?.ok_or_else(|| missing(id))?;
            if change_set.status.is_terminal() {
                return Err(VaultError::Conflict(format!(
                    "Change set #{id} is already {}",
                    change_set.status
                )));
            }
            if !actor.owns_or_admin(&change_set.author) {
                return Err(VaultError::PermissionDenied(format!(
                    "Only the author or an admin may close change set #{id}"
                )));
            }

            let discarded = change_set.staged_keys();
            change_set.operations.clear();
            change_set.status = ChangeSetStatus::Closed;
            change_set.updated_at = Utc::now();
            save_in(txn, &change_set)?;
            Ok((change_set, discarded))
        })?;

        for key in &discarded {
            self.discard_blob(key).await;
        }

        self.emit(
            AuditEvent::new(&actor.id, "cr.close", "change_set", id.to_string())
                .detail("discarded", discarded.len()),
        );
        Ok(change_set)
    }
}

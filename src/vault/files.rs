use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::change_sets::{Intent, StageEntry, Target};
use super::{require, Staged, Vault, VaultError, VaultResult};
use crate::access::{Actor, Capability};
use crate::audit::AuditEvent;
use crate::diff::FileDiff;
use crate::keys::{self, RESERVED_SENTINEL};
use crate::object_store::ObjectStoreError;
use crate::storage::models::{ChangeSetStatus, FileVersion, OperationKind, SharingRecord};

const SEARCH_LIMIT: usize = 50;

/// A live file with its sharing flags.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentFile {
    #[serde(flatten)]
    pub version: FileVersion,
    pub is_public: bool,
    pub is_archived: bool,
}

/// Bytes of one version plus what a reader needs to present them.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub version: FileVersion,
    pub content: Bytes,
    pub content_type: String,
    pub is_text: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowseEntry {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub version: Option<u64>,
    pub author: Option<String>,
    pub is_public: bool,
    pub is_archived: bool,
}

/// One level of the canonical namespace
#[derive(Debug, Clone, Serialize)]
pub struct BrowseListing {
    pub prefix: String,
    pub folders: Vec<String>,
    pub files: Vec<BrowseEntry>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VaultStats {
    pub live_files: u64,
    pub total_versions: u64,
    pub total_change_sets: u64,
    pub pending_review: u64,
}

fn share_flags(records: &[SharingRecord], path: &str) -> (bool, bool) {
    records
        .iter()
        .find(|r| r.file_path == path)
        .map_or((false, false), |r| (r.is_public, r.is_archived))
}

fn to_content(version: FileVersion, content: Bytes) -> FileContent {
    FileContent {
        content_type: keys::content_type(&version.file_path),
        is_text: keys::is_text(&version.file_path),
        version,
        content,
    }
}

impl Vault {
    // ========================================================================
    // Reads
    // ========================================================================

    /// Live files under `prefix`, ordered by path.
    pub fn list_current_files(&self, prefix: &str) -> VaultResult<Vec<CurrentFile>> {
        let prefix = keys::folder_prefix(prefix);
        let files = self.db.current_files(&prefix)?;
        self.with_share_flags(files)
    }

    /// Case-insensitive substring match over live paths.
    pub fn search(&self, query: &str) -> VaultResult<Vec<CurrentFile>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let files = self.db.search_current(query, SEARCH_LIMIT)?;
        self.with_share_flags(files)
    }

    fn with_share_flags(&self, files: Vec<FileVersion>) -> VaultResult<Vec<CurrentFile>> {
        let paths: Vec<String> = files.iter().map(|f| f.file_path.clone()).collect();
        let shares = self.db.get_shares(&paths)?;
        Ok(files
            .into_iter()
            .map(|version| {
                let (is_public, is_archived) = share_flags(&shares, &version.file_path);
                CurrentFile {
                    version,
                    is_public,
                    is_archived,
                }
            })
            .collect())
    }

    /// One level of the blob namespace under `prefix`, reserved entries
    /// hidden and files enriched from the ledger.
    pub async fn browse(&self, prefix: &str) -> VaultResult<BrowseListing> {
        let prefix = keys::folder_prefix(prefix);
        if prefix.starts_with(RESERVED_SENTINEL) {
            return Err(VaultError::NotFound(format!("Folder '{prefix}' not found")));
        }

        let listing = self
            .store
            .list(&prefix, "/")
            .await
            .map_err(|e| VaultError::unreadable("Folder listing", e))?;

        let folders: Vec<String> = listing
            .common_prefixes
            .into_iter()
            .filter(|p| !p.starts_with(RESERVED_SENTINEL))
            .collect();

        let candidates: Vec<_> = listing
            .files
            .into_iter()
            .filter(|f| !f.key.starts_with(RESERVED_SENTINEL) && !f.key.ends_with('/'))
            .collect();
        let paths: Vec<String> = candidates.iter().map(|f| f.key.clone()).collect();
        let shares = self.db.get_shares(&paths)?;

        let mut files = Vec::with_capacity(candidates.len());
        for entry in candidates {
            let latest = self.db.latest_version(&entry.key)?;
            if latest.as_ref().is_some_and(|v| v.is_tombstone) {
                continue;
            }
            let (is_public, is_archived) = share_flags(&shares, &entry.key);
            files.push(BrowseEntry {
                name: keys::file_name(&entry.key).to_string(),
                version: latest.as_ref().map(|v| v.version),
                author: latest.map(|v| v.author),
                path: entry.key,
                size: entry.size,
                modified_at: entry.modified_at,
                is_public,
                is_archived,
            });
        }

        Ok(BrowseListing {
            prefix,
            folders,
            files,
        })
    }

    /// Content of `version`, or of the latest version when `None`.
    /// Tombstones are Gone; paths or versions never written are NotFound.
    pub async fn get_content(&self, path: &str, version: Option<u64>) -> VaultResult<FileContent> {
        let path = keys::user_path(path)?;
        let row = match version {
            Some(v) => self.db.get_version(&path, v)?.ok_or_else(|| {
                VaultError::NotFound(format!("Version {v} of '{path}' not found"))
            })?,
            None => self
                .db
                .latest_version(&path)?
                .ok_or_else(|| VaultError::NotFound(format!("File '{path}' not found")))?,
        };
        if row.is_tombstone {
            return Err(VaultError::Gone(format!(
                "'{path}' was deleted in version {}",
                row.version
            )));
        }

        let content = self.read_blob(&row.blob_ref, "File content").await?;
        Ok(to_content(row, content))
    }

    /// Latest content served from the canonical key. Falls back to the
    /// version snapshot if the canonical blob is missing or does not hold
    /// the latest version's bytes.
    pub async fn read_current(&self, path: &str) -> VaultResult<FileContent> {
        let path = keys::user_path(path)?;
        let row = self.live_version(&path)?;
        self.read_canonical(row).await
    }

    pub(crate) fn live_version(&self, path: &str) -> VaultResult<FileVersion> {
        let row = self
            .db
            .latest_version(path)?
            .ok_or_else(|| VaultError::NotFound(format!("File '{path}' not found")))?;
        if row.is_tombstone {
            return Err(VaultError::Gone(format!("'{path}' has been deleted")));
        }
        Ok(row)
    }

    pub(crate) async fn read_canonical(&self, row: FileVersion) -> VaultResult<FileContent> {
        let content = match self.store.get(&row.file_path).await {
            Ok(data) if keys::content_hash(&data) == row.content_hash => data,
            Ok(_) | Err(ObjectStoreError::NotFound(_)) => {
                self.read_blob(&row.blob_ref, "File content").await?
            }
            Err(e) => return Err(VaultError::unreadable("File content", e)),
        };
        Ok(to_content(row, content))
    }

    /// Every version of `path`, newest first.
    pub fn history(&self, path: &str) -> VaultResult<Vec<FileVersion>> {
        let path = keys::user_path(path)?;
        let versions = self.db.history(&path)?;
        if versions.is_empty() {
            return Err(VaultError::NotFound(format!("No history for '{path}'")));
        }
        Ok(versions)
    }

    /// Line diff between two committed versions. A tombstone diffs as empty.
    pub async fn diff(&self, path: &str, old: u64, new: u64) -> VaultResult<FileDiff> {
        let path = keys::user_path(path)?;
        let old_text = self.committed_text(&path, old).await?;
        let new_text = self.committed_text(&path, new).await?;
        Ok(FileDiff::compute(
            format!("{path} (v{old})"),
            format!("{path} (v{new})"),
            old_text,
            new_text,
        ))
    }

    async fn committed_text(&self, path: &str, version: u64) -> VaultResult<String> {
        let row = self
            .db
            .get_version(path, version)?
            .ok_or_else(|| VaultError::NotFound(format!("Version {version} of '{path}' not found")))?;
        if row.is_tombstone {
            return Ok(String::new());
        }
        let data = self.read_blob(&row.blob_ref, "File content").await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn stats(&self, actor: &Actor) -> VaultResult<VaultStats> {
        require(actor, Capability::Administer)?;
        let ledger = self.db.ledger_stats()?;
        Ok(VaultStats {
            live_files: ledger.live_files,
            total_versions: ledger.versions,
            total_change_sets: self.db.count_change_sets(None)?,
            pending_review: self
                .db
                .count_change_sets(Some(ChangeSetStatus::PendingReview))?,
        })
    }

    // ========================================================================
    // Staged mutations (land in the actor's draft)
    // ========================================================================

    /// Stage new content for `path`: a create if the path is not live, an
    /// edit otherwise. A non-empty `message` retitles an auto-created draft.
    pub async fn stage_save(
        &self,
        actor: &Actor,
        path: &str,
        content: Bytes,
        message: Option<&str>,
    ) -> VaultResult<Staged> {
        require(actor, Capability::Write)?;
        let file_path = keys::user_path(path)?;

        let staged = self
            .stage_batch(
                actor,
                Target::Draft,
                vec![StageEntry {
                    file_path: file_path.clone(),
                    intent: Intent::Content,
                    content: Some(content),
                }],
                message,
            )
            .await?;

        let action = match staged.operations.first().map(|op| op.kind) {
            Some(OperationKind::Edit) => "file.stage_edit",
            _ => "file.stage_create",
        };
        self.emit(
            AuditEvent::new(&actor.id, action, "file", file_path)
                .detail("change_set_id", staged.change_set.id),
        );
        Ok(staged)
    }

    /// Stage a delete. Allowed for write-capable roles and for whoever
    /// authored the path's latest version.
    pub async fn stage_delete(&self, actor: &Actor, path: &str) -> VaultResult<Staged> {
        let file_path = keys::user_path(path)?;
        let latest = self.live_version(&file_path).map_err(|e| match e {
            VaultError::Gone(_) => VaultError::NotFound(format!("'{file_path}' does not exist")),
            other => other,
        })?;
        if !actor.can(Capability::Write) && latest.author != actor.id {
            return Err(VaultError::PermissionDenied(format!(
                "You may not delete '{file_path}'"
            )));
        }

        let staged = self
            .stage_batch(
                actor,
                Target::Draft,
                vec![StageEntry {
                    file_path: file_path.clone(),
                    intent: Intent::Explicit(OperationKind::Delete),
                    content: None,
                }],
                None,
            )
            .await?;

        self.emit(
            AuditEvent::new(&actor.id, "file.stage_delete", "file", file_path)
                .detail("change_set_id", staged.change_set.id),
        );
        Ok(staged)
    }

    /// Stage the content of an earlier version as the next one.
    pub async fn stage_restore(&self, actor: &Actor, path: &str, version: u64) -> VaultResult<Staged> {
        require(actor, Capability::Write)?;
        let file_path = keys::user_path(path)?;
        let row = self
            .db
            .get_version(&file_path, version)?
            .ok_or_else(|| {
                VaultError::NotFound(format!("Version {version} of '{file_path}' not found"))
            })?;
        if row.is_tombstone {
            return Err(VaultError::Gone(format!(
                "Version {version} of '{file_path}' is a deletion and cannot be restored"
            )));
        }
        let content = self.read_blob(&row.blob_ref, "Version content").await?;

        let staged = self
            .stage_batch(
                actor,
                Target::Draft,
                vec![StageEntry {
                    file_path: file_path.clone(),
                    intent: Intent::Content,
                    content: Some(content),
                }],
                None,
            )
            .await?;

        self.emit(
            AuditEvent::new(&actor.id, "file.stage_restore", "file", file_path)
                .detail("from_version", version)
                .detail("change_set_id", staged.change_set.id),
        );
        Ok(staged)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    /// Write an empty `<path>/` marker. Folders hold no content, so this is
    /// not reviewed.
    pub async fn create_folder(&self, actor: &Actor, path: &str) -> VaultResult<String> {
        require(actor, Capability::Write)?;
        let marker = format!("{}/", keys::user_path(path)?);
        self.store
            .put(&marker, Bytes::new(), keys::FOLDER_CONTENT_TYPE)
            .await?;

        self.emit(AuditEvent::new(&actor.id, "folder.create", "folder", marker.clone()));
        Ok(marker)
    }

    /// Stage a delete for every live file under the folder, in one draft.
    pub async fn stage_delete_folder(&self, actor: &Actor, path: &str) -> VaultResult<Staged> {
        require(actor, Capability::Write)?;
        let marker = format!("{}/", keys::user_path(path)?);
        let live = self.db.current_files(&marker)?;
        if live.is_empty() {
            return Err(VaultError::NotFound(format!(
                "No files found in folder '{marker}'"
            )));
        }

        let entries = live
            .into_iter()
            .map(|f| StageEntry {
                file_path: f.file_path,
                intent: Intent::Explicit(OperationKind::Delete),
                content: None,
            })
            .collect();
        let staged = self.stage_batch(actor, Target::Draft, entries, None).await?;

        self.discard_blob(&marker).await;
        self.emit(
            AuditEvent::new(&actor.id, "folder.stage_delete", "folder", marker)
                .detail("file_count", staged.operations.len())
                .detail("change_set_id", staged.change_set.id),
        );
        Ok(staged)
    }
}

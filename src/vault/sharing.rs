use super::{require, FileContent, Vault, VaultError, VaultResult};
use crate::access::{Actor, Capability};
use crate::audit::AuditEvent;
use crate::keys;
use crate::storage::models::SharingRecord;
use crate::storage::ShareFlag;

/// How a public reader names a file
#[derive(Debug, Clone)]
pub enum PublicRef {
    Token(String),
    Path(String),
}

impl Vault {
    pub fn share_info(&self, path: &str) -> VaultResult<Option<SharingRecord>> {
        let path = keys::user_path(path)?;
        Ok(self.db.get_share(&path)?)
    }

    pub fn toggle_public(&self, actor: &Actor, path: &str) -> VaultResult<SharingRecord> {
        let record = self.toggle(actor, path, ShareFlag::Public)?;
        self.emit(
            AuditEvent::new(&actor.id, "file.toggle_public", "file", record.file_path.clone())
                .detail("is_public", record.is_public),
        );
        Ok(record)
    }

    pub fn toggle_archive(&self, actor: &Actor, path: &str) -> VaultResult<SharingRecord> {
        let record = self.toggle(actor, path, ShareFlag::Archived)?;
        self.emit(
            AuditEvent::new(&actor.id, "file.toggle_archive", "file", record.file_path.clone())
                .detail("is_archived", record.is_archived),
        );
        Ok(record)
    }

    fn toggle(&self, actor: &Actor, path: &str, flag: ShareFlag) -> VaultResult<SharingRecord> {
        require(actor, Capability::Write)?;
        let path = keys::user_path(path)?;
        if self.db.latest_version(&path)?.is_none() {
            return Err(VaultError::NotFound(format!("File '{path}' not found")));
        }
        Ok(self.db.toggle_share(&path, &actor.id, flag)?)
    }

    /// Serve a shared file to an anonymous reader. Unknown or private links
    /// are NotFound; archived links and deleted files are Gone.
    pub async fn resolve_public(&self, reference: &PublicRef) -> VaultResult<FileContent> {
        let record = match reference {
            PublicRef::Token(token) => self.db.get_share_by_token(token)?,
            PublicRef::Path(path) => self.db.get_share(&keys::user_path(path)?)?,
        };
        let record = record
            .filter(|r| r.is_public)
            .ok_or_else(|| VaultError::NotFound("Shared file not found".to_string()))?;
        if record.is_archived {
            return Err(VaultError::Gone(format!(
                "'{}' has been archived",
                record.file_path
            )));
        }

        let row = self.live_version(&record.file_path)?;
        self.read_canonical(row).await
    }
}

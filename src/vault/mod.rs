//! The vault: version ledger, change-set engine and sharing registry wired
//! over one metadata store and one blob store.
//!
//! Every metadata precondition is checked inside the same redb write
//! transaction that applies its effect. Blob writes happen outside
//! transactions; blobs written for a transaction that then fails are
//! discarded best-effort.

mod change_sets;
mod error;
mod files;
mod sharing;

pub use change_sets::{ReviewDecision, Staged};
pub use error::{VaultError, VaultResult};
pub use files::{BrowseEntry, BrowseListing, CurrentFile, FileContent, VaultStats};
pub use sharing::PublicRef;

use std::sync::Arc;

use bytes::Bytes;

use crate::access::{Actor, Capability};
use crate::audit::{AuditEvent, AuditSink};
use crate::object_store::ObjectStore;
use crate::storage::Database;

pub struct Vault {
    db: Database,
    store: Arc<dyn ObjectStore>,
    audit: Arc<dyn AuditSink>,
    strict_merge: bool,
}

impl Vault {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            db,
            store,
            audit,
            strict_merge: false,
        }
    }

    /// Reject merges whose operations no longer start from the latest version.
    pub fn with_strict_merge(mut self, strict: bool) -> Self {
        self.strict_merge = strict;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn emit(&self, event: AuditEvent) {
        self.audit.record(event);
    }

    /// Delete a blob this vault no longer references. Failures are logged
    /// and swallowed; metadata never depends on cleanup succeeding.
    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to discard blob");
        }
    }

    async fn read_blob(&self, key: &str, what: &str) -> VaultResult<Bytes> {
        self.store
            .get(key)
            .await
            .map_err(|e| VaultError::unreadable(what, e))
    }
}

fn require(actor: &Actor, capability: Capability) -> VaultResult<()> {
    if actor.can(capability) {
        Ok(())
    } else {
        Err(VaultError::PermissionDenied(format!(
            "Role '{}' may not perform this action",
            actor.role
        )))
    }
}

//! Shared test helpers for handler tests.

use std::sync::Arc;

use crate::access::{Actor, Role};
use crate::audit::MemoryAuditSink;
use crate::config::{Config, ServerConfig, StorageConfig};
use crate::object_store::LocalStore;
use crate::storage::Database;
use crate::vault::Vault;
use crate::AppState;

/// Create a test AppState with a temporary database and local object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    test_state_with_audit(temp_dir, Arc::new(MemoryAuditSink::default()))
}

pub fn test_state_with_audit(
    temp_dir: &tempfile::TempDir,
    audit: Arc<MemoryAuditSink>,
) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            ..StorageConfig::default()
        },
        strict_merge: false,
        test_mode: true,
        max_upload_size: 1024, // small so size limits are easy to hit
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let object_store = LocalStore::new(&files_dir).expect("Failed to create test object store");
    let vault = Vault::new(db, Arc::new(object_store), audit);

    AppState::new(config, vault)
}

pub fn editor(id: &str) -> Actor {
    Actor::new(id, Role::Editor)
}

pub fn approver(id: &str) -> Actor {
    Actor::new(id, Role::Approver)
}

pub fn viewer(id: &str) -> Actor {
    Actor::new(id, Role::Viewer)
}

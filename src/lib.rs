//! content-vault - A versioned content store where every mutation is reviewed
//!
//! This crate provides:
//! - An append-only version ledger per file path
//! - Change sets that stage create/edit/delete operations for review and
//!   merge them into the ledger and canonical namespace
//! - Public sharing and archiving of canonical paths
//! - Swappable object storage backends (local filesystem, GCS)
//! - redb embedded database for metadata (ACID, MVCC, crash-safe)
//! - REST API with multipart upload support

pub mod access;
pub mod api;
pub mod audit;
pub mod config;
pub mod diff;
pub mod keys;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod vault;

use std::sync::Arc;

use config::Config;
use vault::Vault;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub vault: Vault,
}

impl AppState {
    pub fn new(config: Config, vault: Vault) -> Arc<Self> {
        Arc::new(Self { config, vault })
    }
}

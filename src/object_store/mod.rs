mod gcs;
mod local;

pub use gcs::{GcsStore, RetryPolicy};
pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    /// Timeouts, dropped connections, throttling. Worth retrying later.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// One object returned by a listing.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Result of a prefix listing. `common_prefixes` is only populated when a
/// delimiter was given, and each entry keeps its trailing delimiter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectListing {
    pub files: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
}

/// Abstraction over flat blob namespaces.
/// No versioning of its own: the last `put` for a key wins.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str)
        -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Idempotent: deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<ObjectListing, ObjectStoreError>;
}

/// Fold a flat, sorted key listing into files and common prefixes, the way
/// S3/GCS do when a delimiter is supplied.
pub(crate) fn group_by_delimiter(
    prefix: &str,
    delimiter: &str,
    entries: Vec<ObjectEntry>,
) -> ObjectListing {
    let mut listing = ObjectListing::default();

    for entry in entries {
        if !entry.key.starts_with(prefix) {
            continue;
        }
        if delimiter.is_empty() {
            listing.files.push(entry);
            continue;
        }
        let rest = &entry.key[prefix.len()..];
        match rest.find(delimiter) {
            Some(idx) => {
                let common = format!("{prefix}{}", &rest[..idx + delimiter.len()]);
                if !listing.common_prefixes.contains(&common) {
                    listing.common_prefixes.push(common);
                }
            }
            None => listing.files.push(entry),
        }
    }

    listing.files.sort_by(|a, b| a.key.cmp(&b.key));
    listing.common_prefixes.sort();
    listing
}

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::{group_by_delimiter, ObjectEntry, ObjectListing, ObjectStore, ObjectStoreError};

/// Local filesystem object store for development and testing.
/// Keys containing `/` map onto nested directories; a key ending in `/` is a
/// folder marker and maps onto the directory itself.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key.trim_end_matches('/'))
    }

    /// Remove directories left empty by a delete, up to (not including) the
    /// base path. Object stores have no directories, so an empty one must not
    /// show up as a prefix in listings.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            // Fails on non-empty directories, which ends the walk
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Walk the whole tree and return every object key, directories included
    /// as `dir/` markers.
    async fn walk(&self) -> Result<Vec<ObjectEntry>, ObjectStoreError> {
        let mut entries = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir).await?;
            while let Some(item) = reader.next_entry().await? {
                let path = item.path();
                let Ok(relative) = path.strip_prefix(&self.base_path) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let metadata = item.metadata().await?;
                let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

                if metadata.is_dir() {
                    entries.push(ObjectEntry {
                        key: format!("{key}/"),
                        size: 0,
                        modified_at,
                    });
                    pending.push(path);
                } else {
                    entries.push(ObjectEntry {
                        key,
                        size: metadata.len(),
                        modified_at,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key);
        if key.ends_with('/') {
            tokio::fs::create_dir_all(&path).await?;
            return Ok(());
        }
        // A concurrent delete may prune the parent between the two calls
        for _ in 0..2 {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::write(&path, &data).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                other => return Ok(other?),
            }
        }
        Ok(tokio::fs::write(&path, &data).await?)
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key);
        if key.ends_with('/') {
            // Markers only go away once the folder is empty.
            if path.is_dir() {
                let mut reader = tokio::fs::read_dir(&path).await?;
                if reader.next_entry().await?.is_none() {
                    tokio::fs::remove_dir(&path).await?;
                }
            }
            return Ok(());
        }
        if path.is_file() {
            tokio::fs::remove_file(&path).await?;
            self.prune_empty_parents(&path).await;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.object_path(key);
        if key.ends_with('/') {
            Ok(path.is_dir())
        } else {
            Ok(path.is_file())
        }
    }

    async fn list(&self, prefix: &str, delimiter: &str) -> Result<ObjectListing, ObjectStoreError> {
        let entries = self.walk().await?;
        Ok(group_by_delimiter(prefix, delimiter, entries))
    }
}

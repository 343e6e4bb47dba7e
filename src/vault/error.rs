use thiserror::Error;

use crate::keys::PathError;
use crate::object_store::ObjectStoreError;
use crate::storage::DatabaseError;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("{0}")]
    NotFound(String),
    /// A state-machine precondition failed. The caller should re-fetch.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PermissionDenied(String),
    /// Existed, but was archived or deleted on purpose
    #[error("{0}")]
    Gone(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    ObjectStore(ObjectStoreError),
}

impl From<PathError> for VaultError {
    fn from(e: PathError) -> Self {
        VaultError::Invalid(e.to_string())
    }
}

impl From<ObjectStoreError> for VaultError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(key) => VaultError::NotFound(format!("Blob not found: {key}")),
            ObjectStoreError::Unavailable(detail) => VaultError::Unavailable(detail),
            other => VaultError::ObjectStore(other),
        }
    }
}

impl VaultError {
    /// Blob failures on read paths all surface as NotFound, keeping the detail.
    pub(crate) fn unreadable(what: &str, e: ObjectStoreError) -> Self {
        VaultError::NotFound(format!("{what} is unavailable: {e}"))
    }
}

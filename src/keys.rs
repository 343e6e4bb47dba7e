//! Blob key-space layout.
//!
//! Canonical content lives at the user-visible path. Version snapshots and
//! staged content live under reserved `_`-prefixed namespaces, which user
//! mutations may never address.

use std::fmt::Write as _;

use ring::digest;

pub const RESERVED_SENTINEL: char = '_';
pub const VERSIONS_PREFIX: &str = "_versions/";
pub const STAGING_PREFIX: &str = "_staging/";
pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    Reserved,
    Traversal,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Empty => f.write_str("Path is required"),
            PathError::Reserved => f.write_str("Paths starting with _ are reserved"),
            PathError::Traversal => f.write_str("Path segments must not be empty, '.' or '..'"),
        }
    }
}

/// Normalize a user-supplied path: strip surrounding slashes, then reject
/// empty, reserved and traversal paths. Reads go through this too so staged
/// and version blobs are never reachable by name.
pub fn user_path(raw: &str) -> Result<String, PathError> {
    let path = raw.trim().trim_matches('/');
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.starts_with(RESERVED_SENTINEL) {
        return Err(PathError::Reserved);
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(PathError::Traversal);
    }
    Ok(path.to_string())
}

/// Normalize a listing prefix: `""` for the root, otherwise `dir/`.
pub fn folder_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

pub fn version_key() -> String {
    format!("{VERSIONS_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

pub fn staging_key() -> String {
    format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// Hex-encoded SHA-256 of `data`
pub fn content_hash(data: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, data);
    let mut out = String::with_capacity(64);
    for byte in digest.as_ref() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Whether content at `path` should be treated as text for display and diffs
pub fn is_text(path: &str) -> bool {
    let content_type = content_type(path);
    content_type.starts_with("text/")
        || matches!(
            content_type.as_str(),
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "application/x-yaml"
                | "application/toml"
                | "application/x-sh"
        )
}

/// Last path segment, for display and Content-Disposition
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

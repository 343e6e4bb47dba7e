use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::raw_response;
use crate::access::Actor;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::diff::FileDiff;
use crate::storage::models::FileVersion;
use crate::vault::{BrowseListing, CurrentFile, FileContent, Staged};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub file_path: String,
    pub version: u64,
    pub size: u64,
    pub content_hash: String,
    pub author: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub content_type: String,
    pub is_text: bool,
    /// `utf-8` for text files, `base64` otherwise
    pub encoding: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PrefixParams {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct FolderParams {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct ContentParams {
    pub path: String,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DiffParams {
    pub path: String,
    pub old: u64,
    pub new: u64,
}

#[derive(Debug, Deserialize)]
pub struct RestoreParams {
    pub path: String,
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub message: Option<String>,
}

fn content_response(file: FileContent) -> ContentResponse {
    let (encoding, content) = match std::str::from_utf8(&file.content) {
        Ok(text) if file.is_text => ("utf-8", text.to_string()),
        _ => (
            "base64",
            base64::engine::general_purpose::STANDARD.encode(&file.content),
        ),
    };
    let version = file.version;
    ContentResponse {
        file_path: version.file_path,
        version: version.version,
        size: version.size,
        content_hash: version.content_hash,
        author: version.author,
        message: version.message,
        created_at: version.created_at,
        content_type: file.content_type,
        is_text: file.is_text,
        encoding,
        content,
    }
}

// ============================================================================
// Reads
// ============================================================================

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<PrefixParams>,
) -> Result<Json<JSend<Vec<CurrentFile>>>, ApiError> {
    let files = state.vault.list_current_files(&params.prefix)?;
    Ok(JSend::success(files))
}

pub async fn browse(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<FolderParams>,
) -> Result<Json<JSend<BrowseListing>>, ApiError> {
    let listing = state.vault.browse(&params.path).await?;
    Ok(JSend::success(listing))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<SearchParams>,
) -> Result<Json<JSend<Vec<CurrentFile>>>, ApiError> {
    let files = state.vault.search(&params.q)?;
    Ok(JSend::success(files))
}

pub async fn get_content(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<ContentParams>,
) -> Result<Json<JSend<ContentResponse>>, ApiError> {
    let file = state.vault.get_content(&params.path, params.version).await?;
    Ok(JSend::success(content_response(file)))
}

/// Canonical bytes of the latest version.
/// Route: GET /files/raw/*path
pub async fn raw_file(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let file = state.vault.read_current(&path).await?;
    Ok(raw_response(file))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<Vec<FileVersion>>>, ApiError> {
    let versions = state.vault.history(&params.path)?;
    Ok(JSend::success(versions))
}

pub async fn diff(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<DiffParams>,
) -> Result<Json<JSend<FileDiff>>, ApiError> {
    let diff = state
        .vault
        .diff(&params.path, params.old, params.new)
        .await?;
    Ok(JSend::success(diff))
}

// ============================================================================
// Staged mutations
// ============================================================================

pub async fn save(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppJson(req): AppJson<SaveRequest>,
) -> Result<Json<JSend<Staged>>, ApiError> {
    if req.content.len() as u64 > state.config.max_upload_size {
        return Err(ApiError::payload_too_large(format!(
            "Content exceeds maximum upload size of {} bytes",
            state.config.max_upload_size
        )));
    }

    let staged = state
        .vault
        .stage_save(
            &actor,
            &req.path,
            Bytes::from(req.content),
            req.message.as_deref(),
        )
        .await?;
    Ok(JSend::success(staged))
}

/// Multipart fields: `file` (required), `path` (defaults to `folder` joined
/// with the uploaded file name), `folder`, `message`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    mut multipart: Multipart,
) -> Result<Json<JSend<Staged>>, ApiError> {
    let mut file_data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut path: Option<String> = None;
    let mut folder: Option<String> = None;
    let mut message: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

                if data.len() as u64 > state.config.max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {} bytes",
                        state.config.max_upload_size
                    )));
                }
                file_data = Some(data);
            }
            "path" | "folder" | "message" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Invalid {field_name}: {e}"))
                })?;
                match field_name.as_str() {
                    "path" => path = Some(text),
                    "folder" => folder = Some(text),
                    _ => message = Some(text),
                }
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::bad_request("file field is required"))?;
    let path = match (path.filter(|p| !p.trim().is_empty()), file_name) {
        (Some(path), _) => path,
        (None, Some(name)) => {
            let folder = folder.unwrap_or_default();
            let folder = folder.trim().trim_matches('/');
            if folder.is_empty() {
                name
            } else {
                format!("{folder}/{name}")
            }
        }
        (None, None) => return Err(ApiError::bad_request("path field is required")),
    };

    let staged = state
        .vault
        .stage_save(&actor, &path, file_data, message.as_deref())
        .await?;

    tracing::debug!(path = %path, change_set = staged.change_set.id, "Staged upload");
    Ok(JSend::success(staged))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<Staged>>, ApiError> {
    let staged = state.vault.stage_delete(&actor, &params.path).await?;
    Ok(JSend::success(staged))
}

pub async fn restore(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppQuery(params): AppQuery<RestoreParams>,
) -> Result<Json<JSend<Staged>>, ApiError> {
    let staged = state
        .vault
        .stage_restore(&actor, &params.path, params.version)
        .await?;
    Ok(JSend::success(staged))
}

// ============================================================================
// Folders
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub marker: String,
}

pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<FolderResponse>>, ApiError> {
    let marker = state.vault.create_folder(&actor, &params.path).await?;
    Ok(JSend::success(FolderResponse { marker }))
}

pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<Staged>>, ApiError> {
    let staged = state
        .vault
        .stage_delete_folder(&actor, &params.path)
        .await?;
    Ok(JSend::success(staged))
}

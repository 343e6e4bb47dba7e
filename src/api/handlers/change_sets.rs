use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

use crate::access::Actor;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend, JSendPaginated, Pagination};
use crate::diff::FileDiff;
use crate::storage::models::{ChangeSet, ChangeSetStatus, OperationKind, StagedOperation};
use crate::storage::ChangeSetFilter;
use crate::vault::{ReviewDecision, Staged};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListChangeSetsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub status: Option<ChangeSetStatus>,
    #[serde(default)]
    pub author: Option<String>,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct CreateChangeSetRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChangeSetRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Text goes in `content`; binary content in `content_base64`.
#[derive(Debug, Deserialize)]
pub struct AddOperationRequest {
    pub path: String,
    pub kind: OperationKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub comment: Option<String>,
}

fn request_content(req: &AddOperationRequest) -> Result<Option<Bytes>, ApiError> {
    match (&req.content, &req.content_base64) {
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "provide either content or content_base64, not both",
        )),
        (Some(text), None) => Ok(Some(Bytes::from(text.clone()))),
        (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(|data| Some(Bytes::from(data)))
            .map_err(|e| ApiError::bad_request(format!("content_base64 is not valid base64: {e}"))),
        (None, None) => Ok(None),
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_change_sets(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<ListChangeSetsParams>,
) -> Result<Json<JSendPaginated<ChangeSet>>, ApiError> {
    if params.limit == 0 || params.limit > 100 {
        return Err(ApiError::bad_request("limit must be between 1 and 100"));
    }

    let filter = ChangeSetFilter {
        status: params.status,
        author: params.author,
    };
    let (items, total) = state.vault.list_change_sets(
        &filter,
        params.limit as usize,
        params.offset as usize,
    )?;

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

pub async fn create_change_set(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppJson(req): AppJson<CreateChangeSetRequest>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    let change_set = state
        .vault
        .create_change_set(&actor, &req.title, &req.description)?;
    Ok(JSend::success(change_set))
}

pub async fn get_change_set(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<u64>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    Ok(JSend::success(state.vault.get_change_set(id)?))
}

pub async fn update_change_set(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<u64>,
    AppJson(req): AppJson<UpdateChangeSetRequest>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    if req.title.is_none() && req.description.is_none() {
        return Err(ApiError::bad_request(
            "at least one field (title, description) must be provided",
        ));
    }

    let change_set = state.vault.update_change_set(
        &actor,
        id,
        req.title.as_deref(),
        req.description.as_deref(),
    )?;
    Ok(JSend::success(change_set))
}

pub async fn add_operation(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<u64>,
    AppJson(req): AppJson<AddOperationRequest>,
) -> Result<Json<JSend<Staged>>, ApiError> {
    let content = request_content(&req)?;
    if let Some(ref data) = content {
        if data.len() as u64 > state.config.max_upload_size {
            return Err(ApiError::payload_too_large(format!(
                "Content exceeds maximum upload size of {} bytes",
                state.config.max_upload_size
            )));
        }
    }

    let staged = state
        .vault
        .add_operation(&actor, id, &req.path, req.kind, content)
        .await?;
    Ok(JSend::success(staged))
}

pub async fn remove_operation(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((id, op_id)): Path<(u64, u64)>,
) -> Result<Json<JSend<StagedOperation>>, ApiError> {
    let removed = state.vault.remove_operation(&actor, id, op_id).await?;
    Ok(JSend::success(removed))
}

pub async fn operation_diff(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path((id, op_id)): Path<(u64, u64)>,
) -> Result<Json<JSend<FileDiff>>, ApiError> {
    let diff = state.vault.operation_diff(id, op_id).await?;
    Ok(JSend::success(diff))
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<u64>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    Ok(JSend::success(state.vault.submit(&actor, id)?))
}

pub async fn review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<u64>,
    AppJson(req): AppJson<ReviewRequest>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    let change_set = state
        .vault
        .review(&actor, id, req.decision, req.comment.as_deref())?;
    Ok(JSend::success(change_set))
}

pub async fn merge(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<u64>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    Ok(JSend::success(state.vault.merge(&actor, id).await?))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<u64>,
) -> Result<Json<JSend<ChangeSet>>, ApiError> {
    Ok(JSend::success(state.vault.close(&actor, id).await?))
}

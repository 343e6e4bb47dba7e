use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use std::sync::Arc;

use super::files::PathParams;
use super::raw_response;
use crate::access::Actor;
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::storage::models::SharingRecord;
use crate::vault::PublicRef;
use crate::AppState;

pub async fn share_info(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<Option<SharingRecord>>>, ApiError> {
    Ok(JSend::success(state.vault.share_info(&params.path)?))
}

pub async fn toggle_public(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<SharingRecord>>, ApiError> {
    Ok(JSend::success(state.vault.toggle_public(&actor, &params.path)?))
}

pub async fn toggle_archive(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppQuery(params): AppQuery<PathParams>,
) -> Result<Json<JSend<SharingRecord>>, ApiError> {
    Ok(JSend::success(state.vault.toggle_archive(&actor, &params.path)?))
}

/// Anonymous read by share token.
/// Route: GET /public/:token
pub async fn public_by_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let file = state
        .vault
        .resolve_public(&PublicRef::Token(token))
        .await?;
    Ok(raw_response(file))
}

/// Anonymous read by canonical path.
/// Route: GET /public/raw/*path
pub async fn public_by_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let file = state.vault.resolve_public(&PublicRef::Path(path)).await?;
    Ok(raw_response(file))
}

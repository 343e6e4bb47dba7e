use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::access::Actor;
use crate::api::response::{ApiError, JSend};
use crate::vault::VaultStats;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub versions_deleted: u64,
    pub change_sets_deleted: u64,
    pub shares_deleted: u64,
}

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<JSend<VaultStats>>, ApiError> {
    Ok(JSend::success(state.vault.stats(&actor)?))
}

/// Clears every metadata table. Blobs are left in place.
pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state
        .vault
        .db()
        .purge_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::warn!(
        versions = stats.versions,
        change_sets = stats.change_sets,
        shares = stats.shares,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        versions_deleted: stats.versions,
        change_sets_deleted: stats.change_sets,
        shares_deleted: stats.shares,
    }))
}

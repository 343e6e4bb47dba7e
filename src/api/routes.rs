use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Leave room for multipart framing and JSON escaping around the payload
    let body_limit = (state.config.max_upload_size as usize).saturating_mul(2);

    let mut router = Router::new()
        // Files (reads are live state, writes are staged into a draft)
        .route(
            "/files",
            get(handlers::list_files).delete(handlers::delete_file),
        )
        .route("/files/browse", get(handlers::browse))
        .route("/files/search", get(handlers::search))
        .route("/files/content", get(handlers::get_content))
        .route("/files/raw/*path", get(handlers::raw_file))
        .route("/files/history", get(handlers::history))
        .route("/files/diff", get(handlers::diff))
        .route("/files/save", post(handlers::save))
        .route("/files/upload", post(handlers::upload))
        .route("/files/restore", post(handlers::restore))
        .route(
            "/folders",
            post(handlers::create_folder).delete(handlers::delete_folder),
        )
        // Sharing
        .route("/files/share", get(handlers::share_info))
        .route("/files/share/public", post(handlers::toggle_public))
        .route("/files/share/archive", post(handlers::toggle_archive))
        // Change sets
        .route(
            "/change-sets",
            get(handlers::list_change_sets).post(handlers::create_change_set),
        )
        .route(
            "/change-sets/:id",
            get(handlers::get_change_set).put(handlers::update_change_set),
        )
        .route("/change-sets/:id/operations", post(handlers::add_operation))
        .route(
            "/change-sets/:id/operations/:op_id",
            delete(handlers::remove_operation),
        )
        .route(
            "/change-sets/:id/operations/:op_id/diff",
            get(handlers::operation_diff),
        )
        .route("/change-sets/:id/submit", post(handlers::submit))
        .route("/change-sets/:id/review", post(handlers::review))
        .route("/change-sets/:id/merge", post(handlers::merge))
        .route("/change-sets/:id/close", post(handlers::close))
        // Public links (no actor)
        .route("/public/raw/*path", get(handlers::public_by_path))
        .route("/public/:token", get(handlers::public_by_token))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .route("/_internal/stats", get(handlers::stats));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

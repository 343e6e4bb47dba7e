mod admin;
mod change_sets;
mod files;
mod sharing;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::keys;
use crate::vault::FileContent;

pub use admin::{admin_purge, health, stats};
pub use change_sets::{
    add_operation, close, create_change_set, get_change_set, list_change_sets, merge,
    operation_diff, remove_operation, review, submit, update_change_set,
};
pub use files::{
    browse, create_folder, delete_file, delete_folder, diff, get_content, history, list_files,
    raw_file, restore, save, search, upload,
};
pub use sharing::{public_by_path, public_by_token, share_info, toggle_archive, toggle_public};

/// Serve file bytes with content headers. Canonical content changes on
/// every merge, so responses are not cached.
fn raw_response(file: FileContent) -> Response {
    let filename = keys::file_name(&file.version.file_path).replace('"', "");
    let size = file.content.len() as u64;

    let mut response = (StatusCode::OK, file.content).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.content_type
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(size));
    if let Ok(value) = format!("inline; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    if let Ok(value) = format!("\"{}\"", file.version.content_hash).parse() {
        headers.insert(header::ETAG, value);
    }

    response
}

//! Route table for the sharing API.
//!
//! ## Structure
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Public share access** (password via `?password=`)
//!   - `GET /share/{id}` download, counted
//!   - `GET /api/files/info/{id}` metadata preview, not counted
//! - **Owner endpoints** (bearer token)
//!   - `POST   /api/files/upload`
//!   - `GET    /api/files`
//!   - `DELETE /api/files/{id}`
//! - **Admin endpoints** (bearer token with the admin flag)
//!   - `GET    /api/admin/stats`
//!   - `GET    /api/admin/files`
//!   - `DELETE /api/admin/files/{id}`

use crate::handlers::{
    AppState,
    admin_handlers::{delete_any_file, list_all_files, stats},
    file_handlers::{delete_file, file_info, list_files, share_file, upload_files},
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router. `max_upload_bytes` caps request bodies on every route.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/share/{id}", get(share_file))
        .route("/api/files/info/{id}", get(file_info))
        .route("/api/files/upload", post(upload_files))
        .route("/api/files", get(list_files))
        .route("/api/files/{id}", delete(delete_file))
        .route("/api/admin/stats", get(stats))
        .route("/api/admin/files", get(list_all_files))
        .route("/api/admin/files/{id}", delete(delete_any_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

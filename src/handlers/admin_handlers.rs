//! Admin-only endpoints. Every handler takes `AdminUser`, so non-admin
//! callers are rejected before any work happens.

use super::{AppState, auth::AdminUser, file_handlers::{FileListResponse, MessageResponse}};
use crate::{errors::AppError, models::summary::UsageStats};
use axum::{
    Json,
    extract::{Path, State},
};

/// `GET /api/admin/stats`
pub async fn stats(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<UsageStats>, AppError> {
    Ok(Json(state.shares.usage_stats().await?))
}

/// `GET /api/admin/files`: every file, newest first.
pub async fn list_all_files(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<FileListResponse>, AppError> {
    let files = state.shares.list_all().await?;
    Ok(Json(FileListResponse { files }))
}

/// `DELETE /api/admin/files/{id}`
pub async fn delete_any_file(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.shares.delete(&id, &admin).await?;
    tracing::info!(%id, admin_id = admin.user_id, "admin deleted file");
    Ok(Json(MessageResponse {
        message: "File deleted successfully".into(),
    }))
}

//! HTTP handlers and the state they share.

pub mod admin_handlers;
pub mod auth;
pub mod file_handlers;
pub mod health_handlers;

use crate::services::share_service::ShareService;
use auth::AuthKeys;
use sqlx::SqlitePool;
use std::path::PathBuf;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub shares: ShareService,
    pub auth: AuthKeys,
    /// Pool behind the registry, used by the readiness probe.
    pub db: SqlitePool,
    /// Root of the object store, used by the readiness probe.
    pub storage_dir: PathBuf,
}

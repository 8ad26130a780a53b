//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness
//! - GET /readyz   -> registry connectivity and payload directory I/O

use super::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Always 200; performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against the registry database and a write/read/delete
/// round trip in the storage directory. 200 when both pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let disk_check = probe_disk(&state.storage_dir).await;

    let overall_ok = sqlite_check.ok && disk_check.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("disk", disk_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_disk(dir: &Path) -> CheckStatus {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        return CheckStatus::failed(format!("could not write tmp file: {}", e));
    }
    let read = fs::read(&tmp_path).await;
    let removed = fs::remove_file(&tmp_path).await;
    match (read, removed) {
        (Ok(bytes), _) if bytes != b"readyz" => CheckStatus::failed("file content mismatch"),
        (Ok(_), Ok(())) => CheckStatus::ok(),
        (Ok(_), Err(e)) => CheckStatus {
            ok: true,
            error: Some(format!("could not remove tmp file: {}", e)),
        },
        (Err(e), _) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

//! HTTP handlers for uploading, previewing, serving, listing and deleting
//! shared files. Bodies are streamed in both directions; all lifecycle rules
//! live in `ShareService`.

use super::{
    AppState,
    auth::{AuthUser, ClientInfo},
};
use crate::{
    errors::AppError,
    models::summary::{FilePreview, FileSummary, UploadOutcome, UploadedFile},
    services::share_service::{DEFAULT_CONTENT_TYPE, PendingUpload},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;

/// RFC 5987 `attr-char` punctuation commonly found in file names stays literal.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Optional share password, passed as `?password=`.
#[derive(Debug, Default, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<UploadOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub file: FilePreview,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `POST /api/files/upload`
///
/// Multipart body with one or more `files` parts and an optional `password`
/// part. Each file is stored as soon as its part arrives; records are created
/// once the whole form has been read so the password applies to every file
/// regardless of field order. Files succeed or fail independently.
pub async fn upload_files(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut password: Option<String> = None;
    let mut stored: Vec<Result<PendingUpload, (String, String)>> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                discard_stored(&state, &stored).await;
                return Err(multipart_error(err));
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("password") => match field.text().await {
                Ok(value) => password = Some(value),
                Err(err) => {
                    discard_stored(&state, &stored).await;
                    return Err(multipart_error(err));
                }
            },
            Some("files") => {
                let display_name = field
                    .file_name()
                    .map(sanitize_display_name)
                    .unwrap_or_else(|| "unnamed".to_string());
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();

                match state.shares.store_upload(body).await {
                    Ok(blob) => stored.push(Ok(PendingUpload {
                        display_name,
                        content_type,
                        blob,
                    })),
                    Err(err) => {
                        tracing::warn!(%display_name, error = %err, "failed to store uploaded file");
                        stored.push(Err((display_name, "Failed to save file".to_string())));
                    }
                }
            }
            other => {
                tracing::debug!(field = ?other, "ignoring unexpected multipart field");
            }
        }
    }

    if stored.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    let verifier = match state.shares.password_verifier(password.as_deref()).await {
        Ok(verifier) => verifier,
        Err(err) => {
            discard_stored(&state, &stored).await;
            return Err(err.into());
        }
    };

    let mut files = Vec::with_capacity(stored.len());
    for entry in stored {
        let outcome = match entry {
            Ok(upload) => {
                let display_name = upload.display_name.clone();
                match state
                    .shares
                    .register_upload(caller.user_id, upload, verifier.clone())
                    .await
                {
                    Ok(record) => UploadOutcome::Created(UploadedFile::from(&record)),
                    Err(err) => {
                        tracing::warn!(%display_name, error = %err, "failed to register uploaded file");
                        UploadOutcome::Failed {
                            display_name,
                            error: "Failed to save file info".to_string(),
                        }
                    }
                }
            }
            Err((display_name, error)) => UploadOutcome::Failed {
                display_name,
                error,
            },
        };
        files.push(outcome);
    }

    Ok(Json(UploadResponse { files }))
}

/// `GET /api/files`: the caller's files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<FileListResponse>, AppError> {
    let files = state.shares.list_owned(caller.user_id).await?;
    Ok(Json(FileListResponse { files }))
}

/// `DELETE /api/files/{id}`: owner delete; admins pass the guard too.
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.shares.delete(&id, &caller).await?;
    Ok(Json(MessageResponse {
        message: "File deleted successfully".into(),
    }))
}

/// `GET /api/files/info/{id}`: metadata only, never counted.
pub async fn file_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PasswordQuery>,
) -> Result<Json<PreviewResponse>, AppError> {
    let file = state.shares.preview(&id, q.password.as_deref()).await?;
    Ok(Json(PreviewResponse { file }))
}

/// `GET /share/{id}`: stream the file as an attachment.
pub async fn share_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PasswordQuery>,
    ClientInfo(origin): ClientInfo,
) -> Result<Response, AppError> {
    let served = state
        .shares
        .serve(&id, q.password.as_deref(), origin)
        .await?;

    let stream = ReaderStream::new(served.reader);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(
        response.headers_mut(),
        &served.record.display_name,
        &served.record.content_type,
        served.record.byte_size,
    );

    Ok(response)
}

/// Remove payloads written for a form that is being rejected as a whole.
async fn discard_stored(state: &AppState, stored: &[Result<PendingUpload, (String, String)>]) {
    for upload in stored.iter().flatten() {
        if let Err(err) = state.shares.store().delete(&upload.blob.locator).await {
            tracing::warn!(locator = %upload.blob.locator, error = %err, "failed to discard upload");
        }
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError::new(status, code, format!("Failed to parse multipart form: {}", err.body_text()))
}

fn set_download_headers(
    headers: &mut HeaderMap,
    display_name: &str,
    content_type: &str,
    byte_size: i64,
) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&byte_size.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    let name = sanitize_display_name(display_name);
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' => '\'',
            c if c.is_ascii() => c,
            _ => '_',
        })
        .collect();
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(&name, FILENAME_ENCODE_SET)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
}

/// Keep the last path segment and drop control characters.
fn sanitize_display_name(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    if cleaned.trim().is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

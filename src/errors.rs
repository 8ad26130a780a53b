use crate::services::share_service::ShareError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// The single error type handlers return. Carries a stable machine-readable
/// `code` next to the human message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    /// Shortcut for 401 when no usable credentials were presented
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        });
        if self.code == "password_required" {
            body["password_required"] = json!(true);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", "File not found"),
            ShareError::Gone => Self::new(StatusCode::GONE, "gone", "File has expired"),
            ShareError::PasswordRequired => Self::new(
                StatusCode::UNAUTHORIZED,
                "password_required",
                "Password required",
            ),
            ShareError::Unauthorized => Self::new(
                StatusCode::UNAUTHORIZED,
                "invalid_password",
                "Invalid password",
            ),
            ShareError::Forbidden => Self::forbidden("Access denied"),
            ShareError::Conflict(detail) => {
                tracing::error!(%detail, "registry and object store disagree");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "conflict",
                    "Stored file is unavailable",
                )
            }
            other => {
                tracing::error!(error = %other, "request failed");
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn render(err: ShareError) -> (StatusCode, Value) {
        let response = AppError::from(err).into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn share_errors_map_to_distinct_statuses_and_codes() {
        let cases = [
            (ShareError::NotFound, StatusCode::NOT_FOUND, "not_found"),
            (ShareError::Gone, StatusCode::GONE, "gone"),
            (ShareError::PasswordRequired, StatusCode::UNAUTHORIZED, "password_required"),
            (ShareError::Unauthorized, StatusCode::UNAUTHORIZED, "invalid_password"),
            (ShareError::Forbidden, StatusCode::FORBIDDEN, "forbidden"),
            (
                ShareError::Conflict("missing".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "conflict",
            ),
        ];
        for (err, status, code) in cases {
            let (got_status, body) = render(err).await;
            assert_eq!(got_status, status);
            assert_eq!(body["code"], code);
            assert_eq!(body["status"], status.as_u16());
        }
    }

    #[tokio::test]
    async fn only_password_required_carries_the_flag() {
        let (_, body) = render(ShareError::PasswordRequired).await;
        assert_eq!(body["password_required"], true);

        let (_, body) = render(ShareError::Unauthorized).await;
        assert!(body.get("password_required").is_none());
    }
}

//! Crate-wide error taxonomy.
//!
//! One enum maps onto both transports: axum's `IntoResponse` and tonic's
//! `Status`, so the two surfaces never disagree about what a given failure
//! means to a caller.

use axum::{http::StatusCode, response::IntoResponse, Json};

#[derive(Debug)]
pub enum AppError {
    /// Input failed schema/shape validation. Carries a field-path-keyed message.
    Validation(String),
    /// Missing/invalid/expired/insufficient token.
    Auth(String),
    /// Referenced entity absent.
    NotFound(String),
    /// CAS loser or duplicate key where the caller's intent is unambiguously blocked.
    Conflict(String),
    /// DB/cache/blob backend unreachable. Callers retry; handlers do not.
    DependencyUnavailable(String),
    /// Reassembled hash did not match the declared hash.
    Integrity(String),
    /// Anything else.
    Internal(String),
}

impl AppError {
    pub fn component(component: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!(component, "{}", err);
        AppError::Internal(format!("{component}: internal error"))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Validation(m) => write!(f, "validation error: {m}"),
            AppError::Auth(m) => write!(f, "auth error: {m}"),
            AppError::NotFound(m) => write!(f, "not found: {m}"),
            AppError::Conflict(m) => write!(f, "conflict: {m}"),
            AppError::DependencyUnavailable(m) => write!(f, "dependency unavailable: {m}"),
            AppError::Integrity(m) => write!(f, "integrity error: {m}"),
            AppError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("database error: {err}");
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            _ => AppError::DependencyUnavailable("catalog store unavailable".into()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("cache error: {err}");
        AppError::DependencyUnavailable("manifest cache unavailable".into())
    }
}

impl From<object_store::Error> for AppError {
    fn from(err: object_store::Error) -> Self {
        tracing::error!("storage error: {err}");
        AppError::DependencyUnavailable("blob storage unavailable".into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {err:#}");
        AppError::Internal("an internal error occurred".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", m.clone()),
            AppError::Auth(m) if m.contains("insufficient") => {
                (StatusCode::FORBIDDEN, "PERMISSION_DENIED", m.clone())
            }
            AppError::Auth(m) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "NOT_FOUND", m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "ABORTED", m.clone()),
            AppError::DependencyUnavailable(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", m.clone())
            }
            AppError::Integrity(m) => (StatusCode::CONFLICT, "INTEGRITY_ERROR", m.clone()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "an internal error occurred".to_string(),
            ),
        };

        let body = serde_json::json!({ "error": { "code": code, "message": message } });
        (status, Json(body)).into_response()
    }
}

impl From<AppError> for tonic::Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(m) => tonic::Status::invalid_argument(m),
            AppError::Auth(m) if m.contains("insufficient") => tonic::Status::permission_denied(m),
            AppError::Auth(m) => tonic::Status::unauthenticated(m),
            AppError::NotFound(m) => tonic::Status::not_found(m),
            AppError::Conflict(m) => tonic::Status::aborted(m),
            AppError::DependencyUnavailable(m) => tonic::Status::unavailable(m),
            AppError::Integrity(m) => tonic::Status::failed_precondition(m),
            AppError::Internal(_) => tonic::Status::internal("an internal error occurred"),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

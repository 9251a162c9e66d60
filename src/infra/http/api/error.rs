//! JSON error envelope for the API: `{"error": {"code", "message", "hint"}}`.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::application::follows::FollowError;
use crate::application::jobs::EnqueueError;
use crate::application::likes::LikeError;
use crate::application::notes::NoteError;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const SERVICE_BUSY: &str = "service_busy";
    pub const CACHE: &str = "cache_error";
    pub const REPO: &str = "repo_error";
}

/// Seconds a client should wait before retrying a rejected follow.
const BUSY_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: ApiErrorMessage<'a>,
}

#[derive(Debug, Serialize)]
struct ApiErrorMessage<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            retry_after: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Authenticated user id required",
            Some("Send the acting user id in the x-user-id header".to_string()),
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::FORBIDDEN,
            "Admin privileges required",
            Some("Add the user id to api.admin_user_ids".to_string()),
        )
    }

    /// 503 with a `Retry-After` header; the client is expected to back off.
    pub fn service_busy(retry_after: u64, hint: impl Into<String>) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::SERVICE_BUSY,
                "Service busy, try again later",
                Some(hint.into()),
            )
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code,
                message: self.message,
                hint: self.hint.as_deref(),
            },
        };
        let mut response = (self.status, Json(body)).into_response();

        if let Some(seconds) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        let detail = self.hint.as_deref().unwrap_or(self.message);
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {detail}", self.code),
        )
        .attach(&mut response);
        response
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { entity } => Self::new(
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND,
                "Resource not found",
                Some(format!("{entity} not found")),
            ),
            DomainError::Validation { field, message } => {
                Self::bad_request("Validation failed", Some(format!("{field}: {message}")))
            }
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        let (status, message) = match &err {
            RepoError::NotFound => {
                return Self::new(
                    StatusCode::NOT_FOUND,
                    codes::NOT_FOUND,
                    "Resource not found",
                    None,
                );
            }
            RepoError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "Invalid input"),
            RepoError::Duplicate { .. } => (StatusCode::CONFLICT, "Duplicate record"),
            RepoError::Integrity { .. } => (StatusCode::CONFLICT, "Integrity constraint violated"),
            RepoError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "Database timeout"),
            RepoError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Persistence error"),
        };
        Self::new(status, codes::REPO, message, Some(err.to_string()))
    }
}

impl From<NoteError> for ApiError {
    fn from(err: NoteError) -> Self {
        match err {
            NoteError::Validation(err) => err.into(),
            NoteError::Repo(err) => err.into(),
        }
    }
}

impl From<LikeError> for ApiError {
    fn from(err: LikeError) -> Self {
        match err {
            LikeError::Cache(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::CACHE,
                "Cache operation failed",
                Some(err.to_string()),
            ),
        }
    }
}

impl From<FollowError> for ApiError {
    fn from(err: FollowError) -> Self {
        match err {
            FollowError::Validation(err) => err.into(),
            FollowError::Enqueue(EnqueueError::CapacityExceeded) => {
                Self::service_busy(BUSY_RETRY_AFTER_SECS, "follow queue is full")
            }
            FollowError::Enqueue(EnqueueError::ShuttingDown) => {
                Self::service_busy(BUSY_RETRY_AFTER_SECS, "service is shutting down")
            }
        }
    }
}

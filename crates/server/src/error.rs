use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use tracing::error;

use progress_core::model::{EnrollmentError, ParseIdError};
use services::ProgressServiceError;
use storage::repository::StorageError;

/// Errors returned by the HTTP handlers, rendered as
/// `{"error": <code>, "error_description": <message>}`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unprocessable(_) => "invalid_progress",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(detail) = self {
            error!(detail = %detail, "request failed");
        }
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.code(),
            "error_description": self.to_string(),
        }))
    }
}

impl From<ParseIdError> for ApiError {
    fn from(e: ParseIdError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ProgressServiceError> for ApiError {
    fn from(e: ProgressServiceError) -> Self {
        match e {
            ProgressServiceError::FormationNotFound(_)
            | ProgressServiceError::LessonNotFound(_)
            | ProgressServiceError::ChapterNotFound
            | ProgressServiceError::Storage(StorageError::NotFound) => {
                ApiError::NotFound(e.to_string())
            }
            ProgressServiceError::LessonLocked(_)
            | ProgressServiceError::Enrollment(EnrollmentError::NotAuthorized(_)) => {
                ApiError::Forbidden(e.to_string())
            }
            ProgressServiceError::Progress(_)
            | ProgressServiceError::Storage(StorageError::InvalidProgress(_)) => {
                ApiError::Unprocessable(e.to_string())
            }
            ProgressServiceError::Storage(StorageError::Conflict) => {
                ApiError::Conflict(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

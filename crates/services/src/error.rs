//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::model::{
    EnrollmentError, FormationSlug, LessonId, ParseIdError, ProgressError,
};
use storage::repository::StorageError;

/// How a failure is handled by the client engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or timeouts; retried on the next debounce cycle.
    Transient,
    /// Missing or expired credentials; surfaced once, persistence stops.
    Authorization,
    /// The backend refused the values; logged, never retried.
    Validation,
    /// Unknown formation or lesson; blocks the page.
    Fatal,
}

/// Errors emitted by progress API implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("not found")]
    NotFound,
    #[error("server error (status {0})")]
    Server(u16),
}

impl SyncError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Network(_)
            | SyncError::Timeout
            | SyncError::Malformed(_)
            | SyncError::Server(_) => ErrorClass::Transient,
            SyncError::Unauthorized => ErrorClass::Authorization,
            SyncError::Rejected(_) => ErrorClass::Validation,
            SyncError::NotFound => ErrorClass::Fatal,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else if e.is_decode() {
            SyncError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            SyncError::Server(status.as_u16())
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error("formation not found: {0}")]
    FormationNotFound(FormationSlug),
    #[error("lesson not found: {0}")]
    LessonNotFound(LessonId),
    #[error("chapter not found")]
    ChapterNotFound,
    #[error("lesson {0} requires an enrollment")]
    LessonLocked(LessonId),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ProgressServiceError> for SyncError {
    fn from(e: ProgressServiceError) -> Self {
        match e {
            ProgressServiceError::FormationNotFound(_)
            | ProgressServiceError::LessonNotFound(_)
            | ProgressServiceError::ChapterNotFound
            | ProgressServiceError::Storage(StorageError::NotFound) => SyncError::NotFound,
            ProgressServiceError::LessonLocked(_)
            | ProgressServiceError::Enrollment(_)
            | ProgressServiceError::Progress(_)
            | ProgressServiceError::Storage(StorageError::InvalidProgress(_)) => {
                SyncError::Rejected(e.to_string())
            }
            ProgressServiceError::Storage(other) => SyncError::Network(other.to_string()),
        }
    }
}

/// Errors emitted by `LessonPlayer`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlayerError {
    #[error("formation not found: {0}")]
    FormationNotFound(FormationSlug),
    #[error("lesson {0} is not part of the open formation")]
    LessonNotFound(LessonId),
    #[error("lesson {0} requires an enrollment")]
    LessonLocked(LessonId),
    #[error("no formation is open")]
    NoFormation,
    #[error("failed to load: {0}")]
    Load(#[source] SyncError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}

impl PlayerError {
    /// Whether this error blocks the page (full-page error with retry).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerError::FormationNotFound(_)
                | PlayerError::LessonNotFound(_)
                | PlayerError::NoFormation
                | PlayerError::Load(_)
                | PlayerError::Id(_)
        )
    }
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_are_classified() {
        assert_eq!(SyncError::Timeout.class(), ErrorClass::Transient);
        assert_eq!(SyncError::Malformed("x".into()).class(), ErrorClass::Transient);
        assert_eq!(SyncError::Server(503).class(), ErrorClass::Transient);
        assert_eq!(SyncError::Unauthorized.class(), ErrorClass::Authorization);
        assert_eq!(SyncError::Rejected("x".into()).class(), ErrorClass::Validation);
        assert_eq!(SyncError::NotFound.class(), ErrorClass::Fatal);
    }

    #[test]
    fn service_errors_map_to_wire_classes() {
        let locked: SyncError = ProgressServiceError::LessonLocked(LessonId::new(2)).into();
        assert_eq!(locked.class(), ErrorClass::Validation);

        let missing: SyncError = ProgressServiceError::LessonNotFound(LessonId::new(2)).into();
        assert_eq!(missing.class(), ErrorClass::Fatal);

        let down: SyncError =
            ProgressServiceError::Storage(StorageError::Connection("closed".into())).into();
        assert_eq!(down.class(), ErrorClass::Transient);
    }
}

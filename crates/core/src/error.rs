use thiserror::Error;

use crate::model::{EnrollmentError, FormationError, LessonError, ParseIdError, ProgressError};

/// Any domain validation failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Formation(#[from] FormationError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}

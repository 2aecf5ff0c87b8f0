mod enrollment;
mod formation;
mod ids;
mod lesson;
mod progress;

pub use enrollment::{EnrollAccess, Enrollment, EnrollmentError, EnrollmentState, Transition};
pub use formation::{Chapter, Formation, FormationError};
pub use ids::{
    ChapterId, FormationId, FormationSlug, LessonId, ParseIdError, UserId, ViewingSessionId,
};
pub use lesson::{Lesson, LessonContent, LessonError, LessonKind};
pub use progress::{LessonProgress, ProgressDelta, ProgressError};

//! Wire contract between the client engine and a progress backend.
//!
//! Every shape here is the canonical JSON of the progress endpoints; unknown
//! fields are rejected on the way in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use progress_core::aggregate::ChapterProgress;
use progress_core::model::{
    Chapter, ChapterId, Enrollment, Formation, FormationId, FormationSlug, Lesson, LessonId,
    LessonProgress, ProgressDelta,
};

use crate::error::SyncError;

//
// ─── DTOs ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LessonProgressView {
    pub lesson: Lesson,
    pub progress: Option<LessonProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterProgressView {
    /// Chapter header, without lessons.
    pub chapter: Chapter,
    pub progress: ChapterProgress,
    pub lessons: Vec<LessonProgressView>,
}

/// `GET /formations/{slug}/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormationProgressView {
    pub formation_id: FormationId,
    pub enrollment: Option<Enrollment>,
    pub chapters_progress: Vec<ChapterProgressView>,
}

impl FormationProgressView {
    /// Every stored progress row in the view.
    pub fn progress_rows(&self) -> impl Iterator<Item = &LessonProgress> {
        self.chapters_progress
            .iter()
            .flat_map(|c| c.lessons.iter())
            .filter_map(|l| l.progress.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Certificate {
    pub formation_id: FormationId,
    pub formation_slug: FormationSlug,
    pub formation_title: String,
    pub completed_at: DateTime<Utc>,
}

/// `GET /progress-dashboard`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dashboard {
    pub total_time_spent_seconds: u64,
    pub enrollments: Vec<Enrollment>,
    pub completed_formations: usize,
    pub certificates: Vec<Certificate>,
    pub lessons_completed: usize,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
}

//
// ─── TRAITS ────────────────────────────────────────────────────────────────────
//

/// Read-only catalog lookups. Needs no credentials.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` for unknown slugs, or transport errors.
    async fn formation(&self, slug: &FormationSlug) -> Result<Formation, SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError::NotFound` for unknown lessons, or transport errors.
    async fn lesson(&self, lesson_id: LessonId) -> Result<Lesson, SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError::NotFound` for unknown chapters, or transport errors.
    async fn chapter_lessons(&self, chapter_id: ChapterId) -> Result<Vec<Lesson>, SyncError>;
}

/// Progress endpoints, scoped to the authenticated learner.
#[async_trait]
pub trait ProgressApi: Send + Sync {
    /// Whether requests carry credentials. Without them every progress call
    /// is skipped by the sync client.
    fn has_credentials(&self) -> bool;

    /// # Errors
    ///
    /// Returns `SyncError` on transport, auth or lookup failures.
    async fn formation_progress(
        &self,
        slug: &FormationSlug,
    ) -> Result<FormationProgressView, SyncError>;

    /// `Ok(None)` when the learner never opened the lesson.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` on transport or auth failures.
    async fn lesson_progress(&self, lesson_id: LessonId)
    -> Result<Option<LessonProgress>, SyncError>;

    /// Idempotent upsert; returns the server's merged record.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` on transport, auth or validation failures.
    async fn upsert_progress(
        &self,
        lesson_id: LessonId,
        delta: &ProgressDelta,
    ) -> Result<LessonProgress, SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError` on transport, auth or authorization failures.
    async fn enroll(&self, slug: &FormationSlug) -> Result<Enrollment, SyncError>;

    /// # Errors
    ///
    /// Returns `SyncError` on transport or auth failures.
    async fn dashboard(&self) -> Result<Dashboard, SyncError>;
}

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use progress_core::aggregate::{self, LessonAccess};
use progress_core::model::{
    ChapterId, EnrollAccess, Enrollment, Formation, FormationId, FormationSlug, Lesson, LessonId,
    LessonProgress, ProgressDelta, Transition, UserId,
};
use progress_core::time::Clock;
use storage::repository::Storage;

use crate::api::{
    CatalogApi, Certificate, ChapterProgressView, Dashboard, FormationProgressView,
    LessonProgressView, ProgressApi,
};
use crate::dashboard::streaks;
use crate::error::{ProgressServiceError, SyncError};

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// One async lock per (user, formation) enrollment row.
#[derive(Default)]
struct EnrollmentLocks {
    locks: Mutex<HashMap<(UserId, FormationId), Arc<AsyncMutex<()>>>>,
}

impl EnrollmentLocks {
    fn get(&self, user_id: UserId, formation_id: FormationId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry((user_id, formation_id)).or_default())
    }
}

/// Backend side of progress tracking: authoritative merge, enrollment
/// recomputation and read models.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    storage: Storage,
    enrollment_locks: Arc<EnrollmentLocks>,
}

impl ProgressService {
    #[must_use]
    pub fn new(clock: Clock, storage: Storage) -> Self {
        Self {
            clock,
            storage,
            enrollment_locks: Arc::default(),
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// # Errors
    ///
    /// Returns `ProgressServiceError::FormationNotFound` for unknown slugs.
    pub async fn formation(&self, slug: &FormationSlug) -> Result<Formation, ProgressServiceError> {
        self.storage
            .catalog
            .get_formation(slug)
            .await?
            .ok_or_else(|| ProgressServiceError::FormationNotFound(slug.clone()))
    }

    /// # Errors
    ///
    /// Returns `ProgressServiceError::LessonNotFound` for unknown lessons.
    pub async fn lesson(&self, lesson_id: LessonId) -> Result<Lesson, ProgressServiceError> {
        self.storage
            .catalog
            .get_lesson(lesson_id)
            .await?
            .ok_or(ProgressServiceError::LessonNotFound(lesson_id))
    }

    /// # Errors
    ///
    /// Returns `ProgressServiceError::ChapterNotFound` when the chapter has no lessons.
    pub async fn chapter_lessons(
        &self,
        chapter_id: ChapterId,
    ) -> Result<Vec<Lesson>, ProgressServiceError> {
        let lessons = self.storage.catalog.chapter_lessons(chapter_id).await?;
        if lessons.is_empty() {
            return Err(ProgressServiceError::ChapterNotFound);
        }
        Ok(lessons)
    }

    /// Enroll a learner in a formation that has at least one free lesson.
    ///
    /// Enrolling twice returns the existing enrollment.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Enrollment` when the formation has no
    /// free lesson, or lookup/storage errors.
    pub async fn enroll(
        &self,
        user_id: UserId,
        slug: &FormationSlug,
    ) -> Result<Enrollment, ProgressServiceError> {
        self.enroll_with(user_id, slug, false).await
    }

    /// Enroll after an external authorization (payment, administrator).
    ///
    /// # Errors
    ///
    /// Returns lookup or storage errors.
    pub async fn grant_enrollment(
        &self,
        user_id: UserId,
        slug: &FormationSlug,
    ) -> Result<Enrollment, ProgressServiceError> {
        self.enroll_with(user_id, slug, true).await
    }

    async fn enroll_with(
        &self,
        user_id: UserId,
        slug: &FormationSlug,
        granted: bool,
    ) -> Result<Enrollment, ProgressServiceError> {
        let formation = self.formation(slug).await?;
        let lock = self.enrollment_locks.get(user_id, formation.id);
        let _guard = lock.lock().await;
        if let Some(existing) = self
            .storage
            .enrollments
            .get_enrollment(user_id, formation.id)
            .await?
        {
            return Ok(existing);
        }

        let access = EnrollAccess::from_flags(formation.has_free_lesson(), granted);
        let now = self.clock.now();
        let mut enrollment = Enrollment::enroll(user_id, formation.id, access, now)?;

        // progress made on free lessons before enrolling counts right away
        let rows = self.formation_rows(user_id, &formation).await?;
        let rollup = aggregate::rollup(&formation, &rows, LessonAccess::Enrolled);
        enrollment.apply_rollup(&rollup, now)?;
        self.storage.enrollments.upsert_enrollment(&enrollment).await?;

        info!(
            user = %user_id,
            formation = %formation.slug,
            percentage = enrollment.progress_percentage,
            "enrolled"
        );
        Ok(enrollment)
    }

    /// # Errors
    ///
    /// Returns `ProgressServiceError::LessonNotFound` for unknown lessons.
    pub async fn lesson_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, ProgressServiceError> {
        self.lesson(lesson_id).await?;
        Ok(self
            .storage
            .progress
            .get_progress(user_id, lesson_id)
            .await?)
    }

    /// Merge a progress delta and recompute the enrollment it belongs to.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::LessonLocked` when writing to a paid
    /// lesson without an enrollment, `Progress` for out-of-range values, or
    /// lookup/storage errors.
    pub async fn upsert_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        delta: &ProgressDelta,
    ) -> Result<LessonProgress, ProgressServiceError> {
        delta.validate()?;
        let lesson = self.lesson(lesson_id).await?;
        let formation_id = self
            .storage
            .catalog
            .formation_of_lesson(lesson_id)
            .await?
            .ok_or(ProgressServiceError::LessonNotFound(lesson_id))?;
        let enrollment = self
            .storage
            .enrollments
            .get_enrollment(user_id, formation_id)
            .await?;

        if !LessonAccess::from_enrolled(enrollment.is_some()).allows(&lesson) {
            return Err(ProgressServiceError::LessonLocked(lesson_id));
        }

        let now = self.clock.now();
        let delta = delta.clone().clamped_to(&lesson.content);
        let stored = self
            .storage
            .progress
            .upsert_progress(user_id, lesson_id, &delta, now)
            .await?;
        debug!(
            user = %user_id,
            lesson = %lesson_id,
            position = stored.position_seconds,
            percentage = stored.completion_percentage,
            completed = stored.is_completed,
            "progress merged"
        );

        if enrollment.is_some() {
            self.recompute_enrollment(user_id, formation_id, lesson_id, now)
                .await?;
        }

        Ok(stored)
    }

    /// Re-derive an enrollment from the stored progress rows.
    ///
    /// Runs under the (user, formation) lock and re-reads the enrollment
    /// there, so of two concurrent upserts the later one sees both rows and
    /// the stored percentage always matches the rows.
    async fn recompute_enrollment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
        lesson_id: LessonId,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressServiceError> {
        let lock = self.enrollment_locks.get(user_id, formation_id);
        let _guard = lock.lock().await;

        let Some(mut enrollment) = self
            .storage
            .enrollments
            .get_enrollment(user_id, formation_id)
            .await?
        else {
            return Ok(());
        };
        let formation = self
            .storage
            .catalog
            .get_formation_by_id(formation_id)
            .await?
            .ok_or(ProgressServiceError::LessonNotFound(lesson_id))?;
        let rows = self.formation_rows(user_id, &formation).await?;
        let rollup = aggregate::rollup(&formation, &rows, LessonAccess::Enrolled);
        let visited = enrollment.visit(lesson_id);
        let transition = enrollment.apply_rollup(&rollup, now)?;
        if transition != Transition::Unchanged || visited {
            self.storage.enrollments.upsert_enrollment(&enrollment).await?;
        }
        if transition == Transition::Completed {
            info!(user = %user_id, formation = %formation.slug, "formation completed");
        }
        Ok(())
    }

    /// Progress tree of a formation for one learner.
    ///
    /// Chapter counts only include lessons the learner may view.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::FormationNotFound` for unknown slugs.
    pub async fn formation_progress(
        &self,
        user_id: UserId,
        slug: &FormationSlug,
    ) -> Result<FormationProgressView, ProgressServiceError> {
        let formation = self.formation(slug).await?;
        let enrollment = self
            .storage
            .enrollments
            .get_enrollment(user_id, formation.id)
            .await?;
        let rows = self.formation_rows(user_id, &formation).await?;
        let rollup = aggregate::rollup(
            &formation,
            &rows,
            LessonAccess::from_enrolled(enrollment.is_some()),
        );

        let chapters_progress = formation
            .chapters
            .iter()
            .zip(rollup.chapters)
            .map(|(chapter, progress)| ChapterProgressView {
                chapter: chapter.header(),
                progress,
                lessons: chapter
                    .lessons
                    .iter()
                    .map(|lesson| LessonProgressView {
                        lesson: lesson.clone(),
                        progress: rows.iter().find(|p| p.lesson_id == lesson.id).cloned(),
                    })
                    .collect(),
            })
            .collect();

        Ok(FormationProgressView {
            formation_id: formation.id,
            enrollment,
            chapters_progress,
        })
    }

    /// Aggregate stats across every enrollment of a learner.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn dashboard(&self, user_id: UserId) -> Result<Dashboard, ProgressServiceError> {
        let enrollments = self.storage.enrollments.list_enrollments(user_id).await?;
        let rows = self.storage.progress.list_user_progress(user_id).await?;

        let mut certificates = Vec::new();
        for enrollment in enrollments.iter().filter(|e| e.is_completed) {
            let (Some(completed_at), Some(formation)) = (
                enrollment.completed_at,
                self.storage
                    .catalog
                    .get_formation_by_id(enrollment.formation_id)
                    .await?,
            ) else {
                continue;
            };
            certificates.push(Certificate {
                formation_id: formation.id,
                formation_slug: formation.slug,
                formation_title: formation.title,
                completed_at,
            });
        }
        certificates.sort_by_key(|c| c.completed_at);

        let active_days: BTreeSet<_> = rows.iter().map(|p| p.updated_at.date_naive()).collect();
        let streaks = streaks(&active_days, self.clock.today());

        Ok(Dashboard {
            total_time_spent_seconds: enrollments
                .iter()
                .map(|e| e.total_time_spent_seconds)
                .sum(),
            completed_formations: enrollments.iter().filter(|e| e.is_completed).count(),
            enrollments,
            certificates,
            lessons_completed: rows.iter().filter(|p| p.is_completed).count(),
            current_streak_days: streaks.current,
            longest_streak_days: streaks.longest,
        })
    }

    async fn formation_rows(
        &self,
        user_id: UserId,
        formation: &Formation,
    ) -> Result<Vec<LessonProgress>, ProgressServiceError> {
        let ids: Vec<LessonId> = formation.lessons().map(|l| l.id).collect();
        Ok(self.storage.progress.list_progress(user_id, &ids).await?)
    }
}

//
// ─── IN-PROCESS API ────────────────────────────────────────────────────────────
//

/// `ProgressApi` served by an in-process `ProgressService`, for a single
/// learner. `user = None` behaves like a client without a token.
#[derive(Clone)]
pub struct LocalProgressApi {
    service: Arc<ProgressService>,
    user: Option<UserId>,
}

impl LocalProgressApi {
    #[must_use]
    pub fn new(service: Arc<ProgressService>, user: Option<UserId>) -> Self {
        Self { service, user }
    }

    fn user(&self) -> Result<UserId, SyncError> {
        self.user.ok_or(SyncError::Unauthorized)
    }
}

#[async_trait]
impl CatalogApi for LocalProgressApi {
    async fn formation(&self, slug: &FormationSlug) -> Result<Formation, SyncError> {
        Ok(self.service.formation(slug).await?)
    }

    async fn lesson(&self, lesson_id: LessonId) -> Result<Lesson, SyncError> {
        Ok(self.service.lesson(lesson_id).await?)
    }

    async fn chapter_lessons(&self, chapter_id: ChapterId) -> Result<Vec<Lesson>, SyncError> {
        Ok(self.service.chapter_lessons(chapter_id).await?)
    }
}

#[async_trait]
impl ProgressApi for LocalProgressApi {
    fn has_credentials(&self) -> bool {
        self.user.is_some()
    }

    async fn formation_progress(
        &self,
        slug: &FormationSlug,
    ) -> Result<FormationProgressView, SyncError> {
        Ok(self.service.formation_progress(self.user()?, slug).await?)
    }

    async fn lesson_progress(
        &self,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, SyncError> {
        Ok(self.service.lesson_progress(self.user()?, lesson_id).await?)
    }

    async fn upsert_progress(
        &self,
        lesson_id: LessonId,
        delta: &ProgressDelta,
    ) -> Result<LessonProgress, SyncError> {
        Ok(self
            .service
            .upsert_progress(self.user()?, lesson_id, delta)
            .await?)
    }

    async fn enroll(&self, slug: &FormationSlug) -> Result<Enrollment, SyncError> {
        Ok(self.service.enroll(self.user()?, slug).await?)
    }

    async fn dashboard(&self) -> Result<Dashboard, SyncError> {
        Ok(self.service.dashboard(self.user()?).await?)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

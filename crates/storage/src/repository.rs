use async_trait::async_trait;
use chrono::{DateTime, Utc};
use progress_core::model::{
    ChapterId, Enrollment, Formation, FormationId, FormationSlug, Lesson, LessonId,
    LessonProgress, ProgressDelta, ProgressError, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    InvalidProgress(#[from] ProgressError),
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Read access to published formations. Writes only come from seeding /
/// catalog administration.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Persist or update a formation with its chapters and lessons.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the formation cannot be stored.
    async fn upsert_formation(&self, formation: &Formation) -> Result<(), StorageError>;

    /// Fetch a formation with chapters and lessons by slug.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing formation is `Ok(None)`.
    async fn get_formation(&self, slug: &FormationSlug) -> Result<Option<Formation>, StorageError>;

    /// Fetch a formation by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_formation_by_id(&self, id: FormationId)
    -> Result<Option<Formation>, StorageError>;

    /// Fetch a single lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// Lessons of a chapter in reading order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn chapter_lessons(&self, chapter_id: ChapterId) -> Result<Vec<Lesson>, StorageError>;

    /// The formation a lesson belongs to.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn formation_of_lesson(&self, id: LessonId)
    -> Result<Option<FormationId>, StorageError>;
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Per (user, lesson) progress rows.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError>;

    /// Merge a delta into the stored row (creating it on first write) and
    /// return the authoritative result.
    ///
    /// The merge is atomic and monotonic, see [`LessonProgress::merge`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidProgress` for out-of-range deltas, or
    /// other storage errors.
    async fn upsert_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        delta: &ProgressDelta,
        now: DateTime<Utc>,
    ) -> Result<LessonProgress, StorageError>;

    /// Rows for the given lessons; lessons without a row are omitted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_progress(
        &self,
        user_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError>;

    /// Every row of a user, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_user_progress(&self, user_id: UserId)
    -> Result<Vec<LessonProgress>, StorageError>;
}

//
// ─── ENROLLMENTS ───────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_enrollment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Persist or update an enrollment. The original `enrolled_at` and an
    /// existing completion are kept.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError>;

    /// All enrollments of a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_enrollments(&self, user_id: UserId) -> Result<Vec<Enrollment>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    formations: Arc<Mutex<HashMap<FormationId, Formation>>>,
    progress: Arc<Mutex<HashMap<(UserId, LessonId), LessonProgress>>>,
    enrollments: Arc<Mutex<HashMap<(UserId, FormationId), Enrollment>>>,
}

fn poisoned<E: ToString>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn upsert_formation(&self, formation: &Formation) -> Result<(), StorageError> {
        let mut guard = self.formations.lock().map_err(poisoned)?;
        let slug_taken = guard
            .values()
            .any(|f| f.slug == formation.slug && f.id != formation.id);
        if slug_taken {
            return Err(StorageError::Conflict);
        }
        guard.insert(formation.id, formation.clone());
        Ok(())
    }

    async fn get_formation(&self, slug: &FormationSlug) -> Result<Option<Formation>, StorageError> {
        let guard = self.formations.lock().map_err(poisoned)?;
        Ok(guard.values().find(|f| &f.slug == slug).cloned())
    }

    async fn get_formation_by_id(
        &self,
        id: FormationId,
    ) -> Result<Option<Formation>, StorageError> {
        let guard = self.formations.lock().map_err(poisoned)?;
        Ok(guard.get(&id).cloned())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let guard = self.formations.lock().map_err(poisoned)?;
        Ok(guard.values().find_map(|f| f.lesson(id).cloned()))
    }

    async fn chapter_lessons(&self, chapter_id: ChapterId) -> Result<Vec<Lesson>, StorageError> {
        let guard = self.formations.lock().map_err(poisoned)?;
        Ok(guard
            .values()
            .find_map(|f| f.chapter(chapter_id))
            .map(|c| c.lessons.clone())
            .unwrap_or_default())
    }

    async fn formation_of_lesson(
        &self,
        id: LessonId,
    ) -> Result<Option<FormationId>, StorageError> {
        let guard = self.formations.lock().map_err(poisoned)?;
        Ok(guard
            .values()
            .find(|f| f.contains_lesson(id))
            .map(|f| f.id))
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.get(&(user_id, lesson_id)).cloned())
    }

    async fn upsert_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        delta: &ProgressDelta,
        now: DateTime<Utc>,
    ) -> Result<LessonProgress, StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        let merged = match guard.get(&(user_id, lesson_id)) {
            Some(existing) => {
                let mut next = existing.clone();
                next.merge(delta, now)?;
                next
            }
            None => LessonProgress::from_delta(user_id, lesson_id, delta, now)?,
        };
        guard.insert((user_id, lesson_id), merged.clone());
        Ok(merged)
    }

    async fn list_progress(
        &self,
        user_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(lesson_ids
            .iter()
            .filter_map(|id| guard.get(&(user_id, *id)).cloned())
            .collect())
    }

    async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        let mut rows: Vec<LessonProgress> = guard
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|(_, p)| p.clone())
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.lesson_id.cmp(&b.lesson_id)));
        Ok(rows)
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn get_enrollment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self.enrollments.lock().map_err(poisoned)?;
        Ok(guard.get(&(user_id, formation_id)).cloned())
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError> {
        let mut guard = self.enrollments.lock().map_err(poisoned)?;
        let key = (enrollment.user_id, enrollment.formation_id);
        let mut next = enrollment.clone();
        if let Some(stored) = guard.get(&key) {
            // same rules as the SQLite adapter: the first enroll action and
            // a completion are never overwritten
            next.enrolled_at = stored.enrolled_at;
            next.is_completed |= stored.is_completed;
            next.completed_at = stored.completed_at.or(next.completed_at);
        }
        guard.insert(key, next);
        Ok(())
    }

    async fn list_enrollments(&self, user_id: UserId) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.enrollments.lock().map_err(poisoned)?;
        let mut rows: Vec<Enrollment> = guard
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.enrolled_at, e.formation_id));
        Ok(rows)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn CatalogRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repo(InMemoryRepository::new())
    }

    /// Use one repository value for every concern.
    pub fn from_repo<R>(repo: R) -> Self
    where
        R: CatalogRepository + ProgressRepository + EnrollmentRepository + Clone + 'static,
    {
        let catalog: Arc<dyn CatalogRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let enrollments: Arc<dyn EnrollmentRepository> = Arc::new(repo);
        Self {
            catalog,
            progress,
            enrollments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::demo_formation;
    use progress_core::model::{EnrollAccess, FormationSlug};
    use progress_core::time::fixed_now;

    fn delta(position: f64, pct: f64, done: bool) -> ProgressDelta {
        ProgressDelta {
            position_seconds: position,
            watch_time_seconds: position as u64,
            completion_percentage: pct,
            is_completed: done,
            notes: None,
        }
    }

    #[tokio::test]
    async fn catalog_lookups_resolve_lessons_and_chapters() {
        let repo = InMemoryRepository::new();
        let formation = demo_formation().unwrap();
        repo.upsert_formation(&formation).await.unwrap();

        let fetched = repo.get_formation(&formation.slug).await.unwrap().unwrap();
        assert_eq!(fetched, formation);

        let first = formation.first_lesson().unwrap();
        assert_eq!(repo.get_lesson(first.id).await.unwrap().as_ref(), Some(first));
        assert_eq!(
            repo.formation_of_lesson(first.id).await.unwrap(),
            Some(formation.id)
        );
        let lessons = repo.chapter_lessons(first.chapter_id).await.unwrap();
        assert_eq!(lessons.first(), Some(first));

        let missing = FormationSlug::parse("missing").unwrap();
        assert!(repo.get_formation(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_progress_is_monotonic() {
        let repo = InMemoryRepository::new();
        let (user, lesson) = (UserId::new(1), LessonId::new(1));

        let first = repo
            .upsert_progress(user, lesson, &delta(540.0, 90.0, true), fixed_now())
            .await
            .unwrap();
        assert!(first.is_completed);

        let second = repo
            .upsert_progress(user, lesson, &delta(10.0, 1.6, false), fixed_now())
            .await
            .unwrap();
        assert!(second.is_completed);
        assert_eq!(second.completion_percentage, 90.0);
        assert_eq!(second.position_seconds, 10.0);
        assert_eq!(second.watch_time_seconds, 540);
    }

    #[tokio::test]
    async fn invalid_delta_does_not_create_row() {
        let repo = InMemoryRepository::new();
        let err = repo
            .upsert_progress(
                UserId::new(1),
                LessonId::new(1),
                &delta(-5.0, 0.0, false),
                fixed_now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidProgress(_)));
        assert!(
            repo.get_progress(UserId::new(1), LessonId::new(1))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn enrollments_round_trip() {
        let repo = InMemoryRepository::new();
        let e = Enrollment::enroll(
            UserId::new(3),
            FormationId::new(1),
            EnrollAccess::Free,
            fixed_now(),
        )
        .unwrap();
        repo.upsert_enrollment(&e).await.unwrap();
        assert_eq!(
            repo.get_enrollment(UserId::new(3), FormationId::new(1))
                .await
                .unwrap(),
            Some(e.clone())
        );
        assert_eq!(repo.list_enrollments(UserId::new(3)).await.unwrap(), vec![e]);
        assert!(repo.list_enrollments(UserId::new(4)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_enrollment_write_keeps_completion() {
        let repo = InMemoryRepository::new();
        let (user, formation) = (UserId::new(3), FormationId::new(1));
        let enrolled =
            Enrollment::enroll(user, formation, EnrollAccess::Free, fixed_now()).unwrap();

        let mut completed = enrolled.clone();
        completed.progress_percentage = 100;
        completed.is_completed = true;
        completed.completed_at = Some(fixed_now());
        repo.upsert_enrollment(&completed).await.unwrap();

        let mut stale = enrolled;
        stale.progress_percentage = 92;
        repo.upsert_enrollment(&stale).await.unwrap();

        let stored = repo.get_enrollment(user, formation).await.unwrap().unwrap();
        assert!(stored.is_completed);
        assert_eq!(stored.completed_at, Some(fixed_now()));
    }
}

//! Lesson viewer orchestration: open a formation, resume a lesson, play it,
//! and keep the rollup current.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use progress_core::Clock;
use progress_core::completion::Completion;
use progress_core::model::{
    Enrollment, FormationSlug, Lesson, LessonId, LessonProgress, ProgressDelta, Transition, UserId,
};
use progress_core::resume::{self, ResumeTarget};

use crate::aggregator::ProgressAggregator;
use crate::api::CatalogApi;
use crate::error::{ErrorClass, PlayerError, SyncError};
use crate::position::PositionSource;
use crate::session::{SessionConfig, SessionReport, run_session};
use crate::store::{ProgressStore, StoreReader};
use crate::sync_client::{ProgressSyncClient, SyncOutcome};

/// Non-blocking messages for the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Credentials were rejected; progress is no longer saved.
    SignInRequired,
    FormationCompleted(FormationSlug),
}

/// A lesson ready to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedLesson {
    pub lesson: Lesson,
    pub progress: Option<LessonProgress>,
    pub resume: ResumeTarget,
}

pub struct LessonPlayer {
    catalog: Arc<dyn CatalogApi>,
    sync: ProgressSyncClient,
    store: ProgressStore,
    clock: Clock,
    session: SessionConfig,
    aggregator: Option<ProgressAggregator>,
    current: Option<LessonId>,
    notices: Vec<Notice>,
    sign_in_noticed: bool,
}

fn load_error(slug: &FormationSlug, e: SyncError) -> PlayerError {
    if e.class() == ErrorClass::Fatal {
        PlayerError::FormationNotFound(slug.clone())
    } else {
        PlayerError::Load(e)
    }
}

impl LessonPlayer {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        sync: ProgressSyncClient,
        user_id: UserId,
        clock: Clock,
        session: SessionConfig,
    ) -> Self {
        Self {
            catalog,
            sync,
            store: ProgressStore::new(user_id),
            clock,
            session,
            aggregator: None,
            current: None,
            notices: Vec::new(),
            sign_in_noticed: false,
        }
    }

    /// Read access to the local progress cache.
    #[must_use]
    pub fn reader(&self) -> StoreReader {
        self.store.reader()
    }

    #[must_use]
    pub fn progress(&self, lesson_id: LessonId) -> Option<LessonProgress> {
        self.store.get(lesson_id)
    }

    #[must_use]
    pub fn aggregator(&self) -> Option<&ProgressAggregator> {
        self.aggregator.as_ref()
    }

    #[must_use]
    pub fn current_lesson(&self) -> Option<LessonId> {
        self.current
    }

    /// Drain pending notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Load a formation and the learner's progress for it.
    ///
    /// Unknown or malformed slugs are fatal. A progress fetch that fails
    /// transiently degrades to an empty cache.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Id`, `PlayerError::FormationNotFound` or
    /// `PlayerError::Load`.
    pub async fn open_formation(&mut self, raw_slug: &str) -> Result<&ProgressAggregator, PlayerError> {
        let slug = FormationSlug::parse(raw_slug)?;
        let formation = self
            .catalog
            .formation(&slug)
            .await
            .map_err(|e| load_error(&slug, e))?;

        let enrollment = match self.sync.formation_progress(&slug).await {
            Ok(Some(view)) => {
                self.store.load(view.progress_rows());
                view.enrollment
            }
            Ok(None) => None,
            Err(e) if e.class() == ErrorClass::Fatal => {
                return Err(PlayerError::FormationNotFound(slug));
            }
            Err(e) => {
                warn!(formation = %slug, error = %e, "progress unavailable, showing catalog only");
                None
            }
        };
        self.check_auth();
        self.replay_unsynced().await;

        self.current = None;
        self.aggregator = Some(ProgressAggregator::new(formation, enrollment));
        self.refresh_rollup();
        debug!(formation = %slug, "formation opened");
        self.aggregator.as_ref().ok_or(PlayerError::NoFormation)
    }

    fn lesson_in_formation(&self, lesson_id: LessonId) -> Result<Lesson, PlayerError> {
        let aggregator = self.aggregator.as_ref().ok_or(PlayerError::NoFormation)?;
        let lesson = aggregator
            .formation()
            .lesson(lesson_id)
            .cloned()
            .ok_or(PlayerError::LessonNotFound(lesson_id))?;
        if !aggregator.access().allows(&lesson) {
            return Err(PlayerError::LessonLocked(lesson_id));
        }
        Ok(lesson)
    }

    /// Select a lesson and work out where playback resumes.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError` if no formation is open, the lesson is not part
    /// of it, or it requires an enrollment.
    pub async fn open_lesson(&mut self, lesson_id: LessonId) -> Result<OpenedLesson, PlayerError> {
        let lesson = self.lesson_in_formation(lesson_id)?;
        // the fetched record must already include anything written offline
        self.replay_unsynced().await;

        match self.sync.lesson_progress(lesson_id).await {
            Ok(Some(stored)) => {
                self.store.reconcile(&stored);
            }
            Ok(None) => {}
            Err(e) => warn!(lesson_id = %lesson_id, error = %e, "using cached progress"),
        }
        self.check_auth();

        let progress = self.store.get(lesson_id);
        let resume = resume::resolve(progress.as_ref(), &lesson.content);
        self.current = Some(lesson_id);
        if let Some(aggregator) = self.aggregator.as_mut() {
            aggregator.visit(lesson_id);
        }

        Ok(OpenedLesson {
            lesson,
            progress,
            resume,
        })
    }

    /// Open `lesson_id`, seek the source to the resume point, enable playback
    /// and run the viewing session to its end.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`LessonPlayer::open_lesson`]. Sync failures
    /// during playback never surface here.
    pub async fn play(
        &mut self,
        lesson_id: LessonId,
        source: &mut dyn PositionSource,
    ) -> Result<SessionReport, PlayerError> {
        let opened = self.open_lesson(lesson_id).await?;

        // seeking after start would play a few frames from 0
        if let ResumeTarget::Seek { position_seconds } = opened.resume {
            source.seek(position_seconds).await;
        }
        source.start().await;

        let report = run_session(
            &opened.lesson,
            source,
            &mut self.store,
            &self.sync,
            &self.clock,
            self.session,
        )
        .await;

        if report.auth_lost {
            self.check_auth();
        }
        self.replay_unsynced().await;
        self.refresh_rollup();
        Ok(report)
    }

    /// Explicit "mark as completed", the only way untimed lessons complete.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError` for unknown or locked lessons.
    pub async fn mark_completed(
        &mut self,
        lesson_id: LessonId,
    ) -> Result<LessonProgress, PlayerError> {
        self.lesson_in_formation(lesson_id)?;
        let done = Completion::marked_complete();
        let mut delta = self.base_delta(lesson_id);
        delta.completion_percentage = done.percentage;
        delta.is_completed = done.is_completed;
        self.write_now(lesson_id, &delta).await
    }

    /// Replace the notes of a lesson.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError` for unknown or locked lessons.
    pub async fn save_notes(
        &mut self,
        lesson_id: LessonId,
        notes: impl Into<String>,
    ) -> Result<LessonProgress, PlayerError> {
        self.lesson_in_formation(lesson_id)?;
        let mut delta = self.base_delta(lesson_id);
        delta.notes = Some(notes.into());
        self.write_now(lesson_id, &delta).await
    }

    /// Enroll in the open formation.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::NoFormation`, or the backend's refusal.
    pub async fn enroll(&mut self) -> Result<Enrollment, PlayerError> {
        let slug = self
            .aggregator
            .as_ref()
            .ok_or(PlayerError::NoFormation)?
            .formation()
            .slug
            .clone();

        let result = self.sync.enroll(&slug).await;
        self.check_auth();
        let enrollment = result?;

        if let Some(aggregator) = self.aggregator.as_mut() {
            aggregator.set_enrollment(Some(enrollment.clone()));
        }
        self.refresh_rollup();
        info!(formation = %slug, "enrolled");
        Ok(enrollment)
    }

    #[must_use]
    pub fn next_lesson(&self) -> Option<&Lesson> {
        let current = self.current?;
        self.aggregator.as_ref()?.formation().next_lesson(current)
    }

    #[must_use]
    pub fn previous_lesson(&self) -> Option<&Lesson> {
        let current = self.current?;
        self.aggregator.as_ref()?.formation().previous_lesson(current)
    }

    /// The cached record as a delta, without notes.
    fn base_delta(&self, lesson_id: LessonId) -> ProgressDelta {
        let record = self.store.get(lesson_id).unwrap_or_else(|| {
            LessonProgress::empty(self.store.user_id(), lesson_id, self.clock.now())
        });
        ProgressDelta {
            notes: None,
            ..record.to_delta()
        }
    }

    /// Apply locally and send without debouncing.
    async fn write_now(
        &mut self,
        lesson_id: LessonId,
        delta: &ProgressDelta,
    ) -> Result<LessonProgress, PlayerError> {
        let mut record = self
            .store
            .apply_optimistic(lesson_id, delta, self.clock.now())?;
        let revision = self.store.revision(lesson_id);

        match self.sync.upsert(lesson_id, delta).await {
            SyncOutcome::Synced(echo) => {
                record = self.store.acknowledge(&echo, revision);
                self.replay_unsynced().await;
            }
            SyncOutcome::AuthLost => self.check_auth(),
            SyncOutcome::Deferred(e) => {
                debug!(lesson_id = %lesson_id, error = %e, "kept local update, will resend");
            }
            SyncOutcome::Rejected(e) => {
                debug!(lesson_id = %lesson_id, error = %e, "kept local update only");
                self.store.mark_synced(lesson_id, revision);
            }
            SyncOutcome::Skipped => {}
        }

        self.refresh_rollup();
        Ok(record)
    }

    /// Resend every cached record the backend has not confirmed, such as a
    /// completion marked while offline or a session's last flush that
    /// failed after playback ended.
    ///
    /// Stops at the first transient failure; the rest wait for the next
    /// call. Returns how many records were delivered.
    pub async fn replay_unsynced(&mut self) -> usize {
        if !self.sync.is_enabled() {
            return 0;
        }

        let mut delivered = 0;
        for write in self.store.unsynced() {
            match self.sync.upsert(write.lesson_id, &write.delta).await {
                SyncOutcome::Synced(echo) => {
                    self.store.acknowledge(&echo, write.revision);
                    delivered += 1;
                }
                SyncOutcome::Rejected(_) => self.store.mark_synced(write.lesson_id, write.revision),
                SyncOutcome::AuthLost => {
                    self.check_auth();
                    break;
                }
                SyncOutcome::Deferred(_) | SyncOutcome::Skipped => break,
            }
        }
        if delivered > 0 {
            info!(delivered, "offline progress delivered");
        }
        delivered
    }

    fn check_auth(&mut self) {
        if self.sync.auth_lost() && !self.sign_in_noticed {
            self.sign_in_noticed = true;
            self.notices.push(Notice::SignInRequired);
        }
    }

    fn refresh_rollup(&mut self) {
        let Some(aggregator) = self.aggregator.as_mut() else {
            return;
        };
        match aggregator.refresh(&self.store.snapshot(), self.clock.now()) {
            Ok(Transition::Completed) => {
                let slug = aggregator.formation().slug.clone();
                info!(formation = %slug, "formation completed");
                self.notices.push(Notice::FormationCompleted(slug));
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "rollup does not match the enrollment"),
        }
    }
}

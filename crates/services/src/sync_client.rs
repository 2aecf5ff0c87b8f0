//! Error-classifying front for a [`ProgressApi`].
//!
//! Failures never reach the viewer: transient ones are deferred to the next
//! debounce cycle, refused values are dropped, and a lost session is reported
//! once after which every progress call is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, warn};

use progress_core::model::{Enrollment, FormationSlug, LessonId, LessonProgress, ProgressDelta};

use crate::api::{Dashboard, FormationProgressView, ProgressApi};
use crate::error::{ErrorClass, SyncError};

/// Result of one progress upsert.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Stored; carries the backend's merged record.
    Synced(LessonProgress),
    /// No credentials (or lost earlier); nothing was sent.
    Skipped,
    /// Transient failure; retry on the next cycle.
    Deferred(SyncError),
    /// The backend refused the values.
    Rejected(SyncError),
    /// Credentials were just found to be invalid. Returned once.
    AuthLost,
}

#[derive(Clone)]
pub struct ProgressSyncClient {
    api: Arc<dyn ProgressApi>,
    auth_lost: Arc<AtomicBool>,
}

impl ProgressSyncClient {
    #[must_use]
    pub fn new(api: Arc<dyn ProgressApi>) -> Self {
        Self {
            api,
            auth_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether progress calls are sent at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.api.has_credentials() && !self.auth_lost.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn auth_lost(&self) -> bool {
        self.auth_lost.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that flips the flag.
    fn mark_auth_lost(&self) -> bool {
        let first = !self.auth_lost.swap(true, Ordering::AcqRel);
        if first {
            error!("progress backend rejected credentials; persistence disabled");
        }
        first
    }

    pub async fn upsert(&self, lesson_id: LessonId, delta: &ProgressDelta) -> SyncOutcome {
        if !self.is_enabled() {
            debug!(lesson_id = %lesson_id, "progress sync skipped");
            return SyncOutcome::Skipped;
        }

        match self.api.upsert_progress(lesson_id, delta).await {
            Ok(record) => SyncOutcome::Synced(record),
            Err(e) => match e.class() {
                ErrorClass::Transient => {
                    warn!(lesson_id = %lesson_id, error = %e, "progress sync deferred");
                    SyncOutcome::Deferred(e)
                }
                ErrorClass::Authorization => {
                    if self.mark_auth_lost() {
                        SyncOutcome::AuthLost
                    } else {
                        SyncOutcome::Skipped
                    }
                }
                ErrorClass::Validation | ErrorClass::Fatal => {
                    warn!(lesson_id = %lesson_id, error = %e, "progress update rejected");
                    SyncOutcome::Rejected(e)
                }
            },
        }
    }

    /// Stored progress for one lesson; `Ok(None)` when sync is disabled.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` on transport failures.
    pub async fn lesson_progress(
        &self,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, SyncError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.observe(self.api.lesson_progress(lesson_id).await)
            .map(Option::flatten)
    }

    /// Progress tree of a formation; `Ok(None)` when sync is disabled.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` on transport or lookup failures.
    pub async fn formation_progress(
        &self,
        slug: &FormationSlug,
    ) -> Result<Option<FormationProgressView>, SyncError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.observe(self.api.formation_progress(slug).await)
    }

    /// # Errors
    ///
    /// Returns `SyncError::Unauthorized` when sync is disabled, or the
    /// backend's error.
    pub async fn enroll(&self, slug: &FormationSlug) -> Result<Enrollment, SyncError> {
        if !self.is_enabled() {
            return Err(SyncError::Unauthorized);
        }
        self.observe(self.api.enroll(slug).await)?
            .ok_or(SyncError::Unauthorized)
    }

    /// # Errors
    ///
    /// Returns `SyncError::Unauthorized` when sync is disabled, or the
    /// backend's error.
    pub async fn dashboard(&self) -> Result<Dashboard, SyncError> {
        if !self.is_enabled() {
            return Err(SyncError::Unauthorized);
        }
        self.observe(self.api.dashboard().await)?
            .ok_or(SyncError::Unauthorized)
    }

    /// Turns an auth failure into `Ok(None)` after flipping the flag.
    fn observe<T>(&self, result: Result<T, SyncError>) -> Result<Option<T>, SyncError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(SyncError::Unauthorized) => {
                self.mark_auth_lost();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

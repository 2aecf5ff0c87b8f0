use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::FormationRollup;
use crate::model::ids::{FormationId, LessonId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("formation {0} requires an authorized enrollment")]
    NotAuthorized(FormationId),

    #[error("rollup belongs to formation {actual}, enrollment is for {expected}")]
    FormationMismatch {
        expected: FormationId,
        actual: FormationId,
    },
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a learner in a formation.
///
/// `NotEnrolled -> Enrolled -> Completed`; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    NotEnrolled,
    Enrolled,
    Completed,
}

impl EnrollmentState {
    #[must_use]
    pub fn of(enrollment: Option<&Enrollment>) -> Self {
        match enrollment {
            None => Self::NotEnrolled,
            Some(e) if e.is_completed => Self::Completed,
            Some(_) => Self::Enrolled,
        }
    }
}

/// How an enroll action is authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollAccess {
    /// The formation has at least one free lesson.
    Free,
    /// An external collaborator (payment, admin) granted access.
    Granted,
    Denied,
}

impl EnrollAccess {
    #[must_use]
    pub fn from_flags(has_free_lesson: bool, externally_granted: bool) -> Self {
        if externally_granted {
            Self::Granted
        } else if has_free_lesson {
            Self::Free
        } else {
            Self::Denied
        }
    }
}

/// Outcome of folding a rollup into an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Updated,
    /// Enrolled -> Completed happened on this update.
    Completed,
}

//
// ─── ENROLLMENT ────────────────────────────────────────────────────────────────
//

/// A learner's relationship with a formation, carrying aggregate progress.
///
/// `progress_percentage` and `total_time_spent_seconds` are only ever
/// written from a [`FormationRollup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Enrollment {
    pub user_id: UserId,
    pub formation_id: FormationId,
    pub progress_percentage: u8,
    pub current_lesson_id: Option<LessonId>,
    pub total_time_spent_seconds: u64,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
}

impl Enrollment {
    /// NotEnrolled -> Enrolled.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::NotAuthorized` when access is denied.
    pub fn enroll(
        user_id: UserId,
        formation_id: FormationId,
        access: EnrollAccess,
        now: DateTime<Utc>,
    ) -> Result<Self, EnrollmentError> {
        if access == EnrollAccess::Denied {
            return Err(EnrollmentError::NotAuthorized(formation_id));
        }
        Ok(Self {
            user_id,
            formation_id,
            progress_percentage: 0,
            current_lesson_id: None,
            total_time_spent_seconds: 0,
            is_completed: false,
            completed_at: None,
            enrolled_at: now,
        })
    }

    #[must_use]
    pub fn state(&self) -> EnrollmentState {
        EnrollmentState::of(Some(self))
    }

    /// Record a lesson visit; returns whether anything changed.
    pub fn visit(&mut self, lesson_id: LessonId) -> bool {
        if self.current_lesson_id == Some(lesson_id) {
            return false;
        }
        self.current_lesson_id = Some(lesson_id);
        true
    }

    /// Recompute derived fields from the current lesson progress rollup.
    ///
    /// Completion is sticky: once completed the enrollment stays completed
    /// even if the formation later grows.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::FormationMismatch` for a rollup of another formation.
    pub fn apply_rollup(
        &mut self,
        rollup: &FormationRollup,
        now: DateTime<Utc>,
    ) -> Result<Transition, EnrollmentError> {
        if rollup.formation_id != self.formation_id {
            return Err(EnrollmentError::FormationMismatch {
                expected: self.formation_id,
                actual: rollup.formation_id,
            });
        }

        let before = self.clone();
        self.progress_percentage = rollup.percentage;
        self.total_time_spent_seconds = rollup.time_spent_seconds;

        if !self.is_completed && rollup.is_complete() {
            self.is_completed = true;
            self.completed_at = Some(now);
            return Ok(Transition::Completed);
        }

        if *self == before {
            Ok(Transition::Unchanged)
        } else {
            Ok(Transition::Updated)
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::FormationRollup;
    use crate::time::fixed_now;

    fn rollup(completed: usize, total: usize) -> FormationRollup {
        FormationRollup::from_counts(FormationId::new(1), completed, total, 60)
    }

    fn enrolled() -> Enrollment {
        Enrollment::enroll(UserId::new(1), FormationId::new(1), EnrollAccess::Free, fixed_now())
            .unwrap()
    }

    #[test]
    fn denied_access_cannot_enroll() {
        let err = Enrollment::enroll(
            UserId::new(1),
            FormationId::new(1),
            EnrollAccess::Denied,
            fixed_now(),
        )
        .unwrap_err();
        assert_eq!(err, EnrollmentError::NotAuthorized(FormationId::new(1)));
        assert_eq!(EnrollmentState::of(None), EnrollmentState::NotEnrolled);
    }

    #[test]
    fn access_flags_prefer_external_grant() {
        assert_eq!(EnrollAccess::from_flags(false, true), EnrollAccess::Granted);
        assert_eq!(EnrollAccess::from_flags(true, false), EnrollAccess::Free);
        assert_eq!(EnrollAccess::from_flags(false, false), EnrollAccess::Denied);
    }

    #[test]
    fn rollup_updates_percentage_and_time() {
        let mut e = enrolled();
        let t = e.apply_rollup(&rollup(3, 12), fixed_now()).unwrap();
        assert_eq!(t, Transition::Updated);
        assert_eq!(e.progress_percentage, 25);
        assert_eq!(e.total_time_spent_seconds, 60);
        assert_eq!(e.state(), EnrollmentState::Enrolled);

        let t = e.apply_rollup(&rollup(3, 12), fixed_now()).unwrap();
        assert_eq!(t, Transition::Unchanged);
    }

    #[test]
    fn completes_only_when_every_lesson_is_done() {
        let mut e = enrolled();
        assert_eq!(
            e.apply_rollup(&rollup(11, 12), fixed_now()).unwrap(),
            Transition::Updated
        );
        assert!(!e.is_completed);

        let done_at = fixed_now() + chrono::Duration::minutes(5);
        assert_eq!(
            e.apply_rollup(&rollup(12, 12), done_at).unwrap(),
            Transition::Completed
        );
        assert_eq!(e.state(), EnrollmentState::Completed);
        assert_eq!(e.completed_at, Some(done_at));
        assert_eq!(e.progress_percentage, 100);
    }

    #[test]
    fn completion_is_terminal() {
        let mut e = enrolled();
        e.apply_rollup(&rollup(12, 12), fixed_now()).unwrap();
        let t = e.apply_rollup(&rollup(12, 13), fixed_now()).unwrap();
        assert_eq!(t, Transition::Updated);
        assert!(e.is_completed);
        assert_eq!(e.progress_percentage, 92);
    }

    #[test]
    fn empty_formation_never_completes() {
        let mut e = enrolled();
        e.apply_rollup(&rollup(0, 0), fixed_now()).unwrap();
        assert!(!e.is_completed);
        assert_eq!(e.progress_percentage, 0);
    }

    #[test]
    fn visit_tracks_current_lesson() {
        let mut e = enrolled();
        assert!(e.visit(LessonId::new(4)));
        assert!(!e.visit(LessonId::new(4)));
        assert_eq!(e.current_lesson_id, Some(LessonId::new(4)));
    }

    #[test]
    fn rollup_for_other_formation_is_rejected() {
        let mut e = enrolled();
        let other = FormationRollup::from_counts(FormationId::new(2), 1, 1, 0);
        assert!(matches!(
            e.apply_rollup(&other, fixed_now()),
            Err(EnrollmentError::FormationMismatch { .. })
        ));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::Completion;
use crate::model::ids::{LessonId, UserId};
use crate::model::lesson::LessonContent;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("position must be a finite, non-negative number of seconds (got {0})")]
    InvalidPosition(f64),

    #[error("completion percentage must be within 0..=100 (got {0})")]
    InvalidPercentage(f64),

    #[error("progress belongs to lesson {expected}, got update for {actual}")]
    LessonMismatch { expected: LessonId, actual: LessonId },
}

//
// ─── DELTA ─────────────────────────────────────────────────────────────────────
//

/// Body of an upsert: the client's latest view of one lesson.
///
/// Sending the same delta twice converges to the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressDelta {
    pub position_seconds: f64,
    pub watch_time_seconds: u64,
    pub completion_percentage: f64,
    pub is_completed: bool,
    /// `None` leaves stored notes untouched.
    #[serde(default)]
    pub notes: Option<String>,
}

impl ProgressDelta {
    /// Check that every numeric field is in range.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` for negative/non-finite positions or percentages
    /// outside `0..=100`.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if !self.position_seconds.is_finite() || self.position_seconds < 0.0 {
            return Err(ProgressError::InvalidPosition(self.position_seconds));
        }
        if !self.completion_percentage.is_finite()
            || !(0.0..=100.0).contains(&self.completion_percentage)
        {
            return Err(ProgressError::InvalidPercentage(self.completion_percentage));
        }
        Ok(())
    }

    /// Clamp the position into the lesson's media range.
    #[must_use]
    pub fn clamped_to(mut self, content: &LessonContent) -> Self {
        if let Some(duration) = content.duration_seconds() {
            self.position_seconds = self.position_seconds.min(f64::from(duration));
        }
        self
    }

    #[must_use]
    pub fn completion(&self) -> Completion {
        Completion {
            percentage: self.completion_percentage,
            is_completed: self.is_completed,
        }
    }
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// Durable progress of one user on one lesson.
///
/// `completion_percentage` and `is_completed` never decrease once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LessonProgress {
    pub lesson_id: LessonId,
    pub user_id: UserId,
    pub position_seconds: f64,
    pub watch_time_seconds: u64,
    pub completion_percentage: f64,
    pub is_completed: bool,
    #[serde(default)]
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

impl LessonProgress {
    /// An untouched record, as if the lesson was never opened.
    #[must_use]
    pub fn empty(user_id: UserId, lesson_id: LessonId, now: DateTime<Utc>) -> Self {
        Self {
            lesson_id,
            user_id,
            position_seconds: 0.0,
            watch_time_seconds: 0,
            completion_percentage: 0.0,
            is_completed: false,
            notes: String::new(),
            updated_at: now,
        }
    }

    /// Create the first record for a (user, lesson) pair from a delta.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the delta is out of range.
    pub fn from_delta(
        user_id: UserId,
        lesson_id: LessonId,
        delta: &ProgressDelta,
        now: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        let mut record = Self::empty(user_id, lesson_id, now);
        record.merge(delta, now)?;
        Ok(record)
    }

    /// Fold a delta into this record.
    ///
    /// Position follows the latest write (rewinds move the resume point),
    /// watch time and completion keep their maximum, completion is sticky,
    /// notes are replaced only when present.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the delta is out of range; the record is
    /// left untouched in that case.
    pub fn merge(&mut self, delta: &ProgressDelta, now: DateTime<Utc>) -> Result<(), ProgressError> {
        delta.validate()?;

        self.position_seconds = delta.position_seconds;
        self.watch_time_seconds = self.watch_time_seconds.max(delta.watch_time_seconds);
        self.completion_percentage = self.completion_percentage.max(delta.completion_percentage);
        self.is_completed = self.is_completed || delta.is_completed;
        if let Some(notes) = &delta.notes {
            self.notes.clone_from(notes);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Merge another full record for the same lesson (e.g. a server echo
    /// arriving after a newer optimistic write).
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::LessonMismatch` if the lessons differ.
    pub fn reconcile(&mut self, other: &LessonProgress) -> Result<(), ProgressError> {
        if other.lesson_id != self.lesson_id {
            return Err(ProgressError::LessonMismatch {
                expected: self.lesson_id,
                actual: other.lesson_id,
            });
        }
        let completion = self.completion().max(other.completion());
        *self = LessonProgress {
            watch_time_seconds: self.watch_time_seconds.max(other.watch_time_seconds),
            completion_percentage: completion.percentage,
            is_completed: completion.is_completed,
            ..other.clone()
        };
        Ok(())
    }

    #[must_use]
    pub fn completion(&self) -> Completion {
        Completion {
            percentage: self.completion_percentage,
            is_completed: self.is_completed,
        }
    }

    /// The delta that would reproduce this record on the server.
    #[must_use]
    pub fn to_delta(&self) -> ProgressDelta {
        ProgressDelta {
            position_seconds: self.position_seconds,
            watch_time_seconds: self.watch_time_seconds,
            completion_percentage: self.completion_percentage,
            is_completed: self.is_completed,
            notes: Some(self.notes.clone()),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn delta(position: f64, watch: u64, pct: f64, done: bool) -> ProgressDelta {
        ProgressDelta {
            position_seconds: position,
            watch_time_seconds: watch,
            completion_percentage: pct,
            is_completed: done,
            notes: None,
        }
    }

    fn record() -> LessonProgress {
        LessonProgress::from_delta(
            UserId::new(1),
            LessonId::new(1),
            &delta(300.0, 300, 50.0, false),
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn rewind_moves_position_but_not_completion() {
        let mut p = record();
        p.merge(&delta(30.0, 320, 5.0, false), fixed_now()).unwrap();
        assert_eq!(p.position_seconds, 30.0);
        assert_eq!(p.completion_percentage, 50.0);
        assert_eq!(p.watch_time_seconds, 320);
    }

    #[test]
    fn completed_never_reverts() {
        let mut p = record();
        p.merge(&delta(570.0, 600, 95.0, true), fixed_now()).unwrap();
        p.merge(&delta(10.0, 610, 1.0, false), fixed_now()).unwrap();
        assert!(p.is_completed);
        assert_eq!(p.completion_percentage, 95.0);
    }

    #[test]
    fn duplicate_delta_is_idempotent() {
        let mut once = record();
        let d = delta(400.0, 410, 66.0, false);
        once.merge(&d, fixed_now()).unwrap();
        let mut twice = once.clone();
        twice.merge(&d, fixed_now()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn watch_time_keeps_maximum() {
        let mut p = record();
        p.merge(&delta(310.0, 100, 51.0, false), fixed_now()).unwrap();
        assert_eq!(p.watch_time_seconds, 300);
    }

    #[test]
    fn notes_replace_only_when_present() {
        let mut p = record();
        let mut with_notes = delta(300.0, 300, 50.0, false);
        with_notes.notes = Some("remember lifetimes".into());
        p.merge(&with_notes, fixed_now()).unwrap();
        p.merge(&delta(310.0, 310, 51.0, false), fixed_now()).unwrap();
        assert_eq!(p.notes, "remember lifetimes");

        with_notes.notes = Some(String::new());
        p.merge(&with_notes, fixed_now()).unwrap();
        assert!(p.notes.is_empty());
    }

    #[test]
    fn out_of_range_delta_is_rejected_without_mutation() {
        let mut p = record();
        let before = p.clone();
        assert!(matches!(
            p.merge(&delta(-1.0, 0, 0.0, false), fixed_now()),
            Err(ProgressError::InvalidPosition(_))
        ));
        assert!(matches!(
            p.merge(&delta(1.0, 0, 101.0, false), fixed_now()),
            Err(ProgressError::InvalidPercentage(_))
        ));
        assert!(p.merge(&delta(f64::NAN, 0, 1.0, false), fixed_now()).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn reconcile_keeps_local_completion_when_echo_is_older() {
        let mut local = record();
        local.merge(&delta(560.0, 560, 93.0, true), fixed_now()).unwrap();
        let echo = record();
        local.reconcile(&echo).unwrap();
        assert!(local.is_completed);
        assert_eq!(local.completion_percentage, 93.0);
        assert_eq!(local.position_seconds, 300.0);
    }

    #[test]
    fn delta_rejects_unknown_fields() {
        let json = r#"{"position_seconds":1.0,"watch_time_seconds":1,"completion_percentage":1.0,"is_completed":false,"bonus":true}"#;
        assert!(serde_json::from_str::<ProgressDelta>(json).is_err());
    }

    #[test]
    fn delta_is_clamped_to_video_duration() {
        let content = LessonContent::video(100).unwrap();
        let d = delta(140.0, 0, 100.0, true).clamped_to(&content);
        assert_eq!(d.position_seconds, 100.0);
    }
}

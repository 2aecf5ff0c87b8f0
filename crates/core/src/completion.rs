//! Lesson completion policy.
//!
//! A timed lesson counts as consumed once nine tenths of it were watched.
//! Untimed lessons (exercise, quiz, text) only complete through an explicit
//! mark-as-completed action.

use serde::{Deserialize, Serialize};

use crate::model::LessonContent;

/// Percentage at or above which a timed lesson is completed.
pub const COMPLETION_THRESHOLD_PERCENT: f64 = 90.0;

/// Completion state of a single lesson.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Completion {
    /// 0..=100
    pub percentage: f64,
    pub is_completed: bool,
}

impl Completion {
    /// The state set by an explicit "mark as completed" action.
    #[must_use]
    pub const fn marked_complete() -> Self {
        Self {
            percentage: 100.0,
            is_completed: true,
        }
    }

    /// Monotonic join: highest percentage, completed if either is.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            percentage: self.percentage.max(other.percentage),
            is_completed: self.is_completed || other.is_completed,
        }
    }
}

/// Map a playback position onto a completion state.
///
/// Non-finite positions count as 0 and the result is clamped into `0..=100`.
/// A zero or non-finite duration yields 0%.
#[must_use]
pub fn evaluate_position(
    position_seconds: f64,
    duration_seconds: f64,
    prior_completed: bool,
) -> Completion {
    let percentage = if duration_seconds.is_finite() && duration_seconds > 0.0 {
        let position = if position_seconds.is_finite() {
            position_seconds
        } else {
            0.0
        };
        (position / duration_seconds * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Completion {
        percentage,
        is_completed: percentage >= COMPLETION_THRESHOLD_PERCENT || prior_completed,
    }
}

/// Evaluate completion for any lesson content.
///
/// Timed content is measured from the position; untimed content keeps the
/// prior state untouched since only an explicit action can complete it.
#[must_use]
pub fn evaluate(content: &LessonContent, position_seconds: f64, prior: Completion) -> Completion {
    match content {
        LessonContent::Video { duration_seconds } => evaluate_position(
            position_seconds,
            f64::from(*duration_seconds),
            prior.is_completed,
        ),
        LessonContent::Exercise { .. } | LessonContent::Quiz { .. } | LessonContent::Text { .. } => {
            prior
        }
    }
}

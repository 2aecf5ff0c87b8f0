//! Where playback starts when a lesson is (re)opened.

use serde::{Deserialize, Serialize};

use crate::model::{LessonContent, LessonProgress};

/// Seek instruction handed to the position source before playback is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeTarget {
    Start,
    Seek { position_seconds: f64 },
}

impl ResumeTarget {
    #[must_use]
    pub fn position_seconds(self) -> f64 {
        match self {
            ResumeTarget::Start => 0.0,
            ResumeTarget::Seek { position_seconds } => position_seconds,
        }
    }
}

/// Resolve the resume target from the last persisted progress.
///
/// Completed lessons resume at the stored position as well, so a finished
/// lesson can be reviewed from where it was left. Positions past the end of
/// the media are clamped to the duration.
#[must_use]
pub fn resolve(progress: Option<&LessonProgress>, content: &LessonContent) -> ResumeTarget {
    let Some(duration) = content.duration_seconds() else {
        return ResumeTarget::Start;
    };
    match progress {
        Some(p) if p.position_seconds.is_finite() && p.position_seconds > 0.0 => {
            ResumeTarget::Seek {
                position_seconds: p.position_seconds.min(f64::from(duration)),
            }
        }
        _ => ResumeTarget::Start,
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::model::ids::{ChapterId, LessonId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("lesson title cannot be empty")]
    EmptyTitle,

    #[error("video duration must be > 0 seconds")]
    InvalidDuration,

    #[error("exercise url must be an absolute http(s) url: {0}")]
    InvalidExerciseUrl(String),

    #[error("quiz must contain at least one question")]
    EmptyQuiz,

    #[error("unknown lesson type: {0}")]
    UnknownKind(String),
}

//
// ─── LESSON KIND ───────────────────────────────────────────────────────────────
//

/// Discriminant of [`LessonContent`], used for storage and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LessonKind {
    Video,
    Exercise,
    Quiz,
    Text,
}

impl LessonKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonKind::Video => "video",
            LessonKind::Exercise => "exercise",
            LessonKind::Quiz => "quiz",
            LessonKind::Text => "text",
        }
    }
}

impl fmt::Display for LessonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonKind {
    type Err = LessonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "exercise" => Ok(Self::Exercise),
            "quiz" => Ok(Self::Quiz),
            "text" => Ok(Self::Text),
            other => Err(LessonError::UnknownKind(other.to_owned())),
        }
    }
}

//
// ─── CONTENT ───────────────────────────────────────────────────────────────────
//

/// What a lesson contains. Only video content is timed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LessonContent {
    Video { duration_seconds: u32 },
    Exercise { url: Url },
    Quiz { question_count: u32 },
    Text { body: String },
}

impl LessonContent {
    /// Builds video content.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidDuration` for a zero duration.
    pub fn video(duration_seconds: u32) -> Result<Self, LessonError> {
        if duration_seconds == 0 {
            return Err(LessonError::InvalidDuration);
        }
        Ok(Self::Video { duration_seconds })
    }

    /// Builds exercise content pointing at an external http(s) resource.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidExerciseUrl` if the url does not parse or
    /// is not http(s).
    pub fn exercise(url: impl AsRef<str>) -> Result<Self, LessonError> {
        let raw = url.as_ref().trim();
        let parsed =
            Url::parse(raw).map_err(|_| LessonError::InvalidExerciseUrl(raw.to_owned()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LessonError::InvalidExerciseUrl(raw.to_owned()));
        }
        Ok(Self::Exercise { url: parsed })
    }

    /// Builds quiz content.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::EmptyQuiz` when there are no questions.
    pub fn quiz(question_count: u32) -> Result<Self, LessonError> {
        if question_count == 0 {
            return Err(LessonError::EmptyQuiz);
        }
        Ok(Self::Quiz { question_count })
    }

    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    #[must_use]
    pub fn kind(&self) -> LessonKind {
        match self {
            LessonContent::Video { .. } => LessonKind::Video,
            LessonContent::Exercise { .. } => LessonKind::Exercise,
            LessonContent::Quiz { .. } => LessonKind::Quiz,
            LessonContent::Text { .. } => LessonKind::Text,
        }
    }

    /// Media duration, only known for video lessons.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<u32> {
        match self {
            LessonContent::Video { duration_seconds } => Some(*duration_seconds),
            _ => None,
        }
    }

    /// Whether completion is derived from a playback position.
    #[must_use]
    pub fn is_timed(&self) -> bool {
        matches!(self, LessonContent::Video { .. })
    }

    fn validate(&self) -> Result<(), LessonError> {
        match self {
            LessonContent::Video { duration_seconds } if *duration_seconds == 0 => {
                Err(LessonError::InvalidDuration)
            }
            LessonContent::Exercise { url } if !matches!(url.scheme(), "http" | "https") => {
                Err(LessonError::InvalidExerciseUrl(url.to_string()))
            }
            LessonContent::Quiz { question_count } if *question_count == 0 => {
                Err(LessonError::EmptyQuiz)
            }
            _ => Ok(()),
        }
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// The atomic unit of content inside a chapter.
///
/// Lessons are published by catalog administration and never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub chapter_id: ChapterId,
    pub title: String,
    /// Ordering within the chapter, ascending.
    pub position: u32,
    #[serde(flatten)]
    pub content: LessonContent,
    pub is_free: bool,
}

impl Lesson {
    /// Create a validated lesson.
    ///
    /// # Errors
    ///
    /// Returns `LessonError` if the title is blank or the content is invalid.
    pub fn new(
        id: LessonId,
        chapter_id: ChapterId,
        title: impl Into<String>,
        position: u32,
        content: LessonContent,
        is_free: bool,
    ) -> Result<Self, LessonError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(LessonError::EmptyTitle);
        }
        content.validate()?;
        Ok(Self {
            id,
            chapter_id,
            title,
            position,
            content,
            is_free,
        })
    }

    #[must_use]
    pub fn kind(&self) -> LessonKind {
        self.content.kind()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_requires_positive_duration() {
        assert_eq!(LessonContent::video(0), Err(LessonError::InvalidDuration));
        assert_eq!(LessonContent::video(600).unwrap().duration_seconds(), Some(600));
    }

    #[test]
    fn exercise_requires_http_url() {
        assert!(LessonContent::exercise("https://example.com/kata").is_ok());
        assert!(matches!(
            LessonContent::exercise("ftp://example.com/kata"),
            Err(LessonError::InvalidExerciseUrl(_))
        ));
        assert!(matches!(
            LessonContent::exercise("not a url"),
            Err(LessonError::InvalidExerciseUrl(_))
        ));
    }

    #[test]
    fn only_video_is_timed() {
        assert!(LessonContent::video(10).unwrap().is_timed());
        assert!(!LessonContent::text("hello").is_timed());
        assert!(!LessonContent::quiz(3).unwrap().is_timed());
        assert_eq!(LessonContent::text("x").duration_seconds(), None);
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = Lesson::new(
            LessonId::new(1),
            ChapterId::new(1),
            "  ",
            0,
            LessonContent::text("body"),
            true,
        )
        .unwrap_err();
        assert_eq!(err, LessonError::EmptyTitle);
    }

    #[test]
    fn lesson_serializes_with_flat_type_tag() {
        let lesson = Lesson::new(
            LessonId::new(3),
            ChapterId::new(1),
            "Ownership",
            2,
            LessonContent::video(734).unwrap(),
            false,
        )
        .unwrap();
        let json = serde_json::to_value(&lesson).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["duration_seconds"], 734);
        assert_eq!(json["is_free"], false);

        let back: Lesson = serde_json::from_value(json).unwrap();
        assert_eq!(back, lesson);
    }

    #[test]
    fn kind_parses_from_storage_string() {
        assert_eq!("quiz".parse::<LessonKind>().unwrap(), LessonKind::Quiz);
        assert!("podcast".parse::<LessonKind>().is_err());
    }
}

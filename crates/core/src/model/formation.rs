use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{ChapterId, FormationId, FormationSlug, LessonId};
use crate::model::lesson::Lesson;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormationError {
    #[error("formation title cannot be empty")]
    EmptyTitle,

    #[error("chapter title cannot be empty")]
    EmptyChapterTitle,

    #[error("chapter {chapter} does not belong to formation {formation}")]
    ForeignChapter {
        chapter: ChapterId,
        formation: FormationId,
    },

    #[error("lesson {lesson} does not belong to chapter {chapter}")]
    ForeignLesson { lesson: LessonId, chapter: ChapterId },

    #[error("duplicate lesson id {0}")]
    DuplicateLesson(LessonId),

    #[error("duplicate chapter id {0}")]
    DuplicateChapter(ChapterId),
}

//
// ─── CHAPTER ───────────────────────────────────────────────────────────────────
//

/// An ordered group of lessons within a formation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub formation_id: FormationId,
    pub title: String,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lessons: Vec<Lesson>,
}

impl Chapter {
    /// Create a chapter, ordering lessons by position.
    ///
    /// # Errors
    ///
    /// Returns `FormationError` if the title is blank or a lesson references
    /// another chapter.
    pub fn new(
        id: ChapterId,
        formation_id: FormationId,
        title: impl Into<String>,
        position: u32,
        mut lessons: Vec<Lesson>,
    ) -> Result<Self, FormationError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(FormationError::EmptyChapterTitle);
        }
        if let Some(foreign) = lessons.iter().find(|l| l.chapter_id != id) {
            return Err(FormationError::ForeignLesson {
                lesson: foreign.id,
                chapter: id,
            });
        }
        lessons.sort_by_key(|l| (l.position, l.id));
        Ok(Self {
            id,
            formation_id,
            title,
            position,
            lessons,
        })
    }

    /// The chapter header without its lessons, as sent on the wire.
    #[must_use]
    pub fn header(&self) -> Self {
        Self {
            lessons: Vec::new(),
            ..self.clone()
        }
    }
}

//
// ─── FORMATION ─────────────────────────────────────────────────────────────────
//

/// A course: ordered chapters of ordered lessons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formation {
    pub id: FormationId,
    pub slug: FormationSlug,
    pub title: String,
    pub chapters: Vec<Chapter>,
}

impl Formation {
    /// Create a formation, ordering chapters by position.
    ///
    /// # Errors
    ///
    /// Returns `FormationError` for blank titles, chapters of another
    /// formation, or duplicate chapter/lesson ids.
    pub fn new(
        id: FormationId,
        slug: FormationSlug,
        title: impl Into<String>,
        mut chapters: Vec<Chapter>,
    ) -> Result<Self, FormationError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(FormationError::EmptyTitle);
        }

        let mut chapter_ids = HashSet::new();
        let mut lesson_ids = HashSet::new();
        for chapter in &chapters {
            if chapter.formation_id != id {
                return Err(FormationError::ForeignChapter {
                    chapter: chapter.id,
                    formation: id,
                });
            }
            if !chapter_ids.insert(chapter.id) {
                return Err(FormationError::DuplicateChapter(chapter.id));
            }
            for lesson in &chapter.lessons {
                if !lesson_ids.insert(lesson.id) {
                    return Err(FormationError::DuplicateLesson(lesson.id));
                }
            }
        }

        chapters.sort_by_key(|c| (c.position, c.id));
        Ok(Self {
            id,
            slug,
            title,
            chapters,
        })
    }

    /// All lessons in reading order.
    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.chapters.iter().flat_map(|c| c.lessons.iter())
    }

    #[must_use]
    pub fn lesson_count(&self) -> usize {
        self.chapters.iter().map(|c| c.lessons.len()).sum()
    }

    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&Lesson> {
        self.lessons().find(|l| l.id == id)
    }

    #[must_use]
    pub fn chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn contains_lesson(&self, id: LessonId) -> bool {
        self.lesson(id).is_some()
    }

    /// Whether a guest can start this formation without external authorization.
    #[must_use]
    pub fn has_free_lesson(&self) -> bool {
        self.lessons().any(|l| l.is_free)
    }

    #[must_use]
    pub fn first_lesson(&self) -> Option<&Lesson> {
        self.lessons().next()
    }

    /// The lesson after `id` in reading order, crossing chapter boundaries.
    #[must_use]
    pub fn next_lesson(&self, id: LessonId) -> Option<&Lesson> {
        let mut it = self.lessons().skip_while(|l| l.id != id);
        it.next()?;
        it.next()
    }

    /// The lesson before `id` in reading order, crossing chapter boundaries.
    #[must_use]
    pub fn previous_lesson(&self, id: LessonId) -> Option<&Lesson> {
        let mut previous = None;
        for lesson in self.lessons() {
            if lesson.id == id {
                return previous;
            }
            previous = Some(lesson);
        }
        None
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::lesson::LessonContent;

    fn lesson(id: u64, chapter: u64, position: u32, is_free: bool) -> Lesson {
        Lesson::new(
            LessonId::new(id),
            ChapterId::new(chapter),
            format!("Lesson {id}"),
            position,
            LessonContent::video(300).unwrap(),
            is_free,
        )
        .unwrap()
    }

    fn build() -> Formation {
        let fid = FormationId::new(1);
        let ch2 = Chapter::new(
            ChapterId::new(2),
            fid,
            "Second",
            1,
            vec![lesson(4, 2, 0, false)],
        )
        .unwrap();
        let ch1 = Chapter::new(
            ChapterId::new(1),
            fid,
            "First",
            0,
            vec![lesson(2, 1, 1, false), lesson(1, 1, 0, true)],
        )
        .unwrap();
        Formation::new(fid, FormationSlug::parse("rust-101").unwrap(), "Rust", vec![ch2, ch1])
            .unwrap()
    }

    #[test]
    fn lessons_are_in_reading_order() {
        let f = build();
        let ids: Vec<u64> = f.lessons().map(|l| l.id.value()).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        assert_eq!(f.lesson_count(), 3);
    }

    #[test]
    fn navigation_crosses_chapters() {
        let f = build();
        assert_eq!(f.next_lesson(LessonId::new(2)).map(|l| l.id), Some(LessonId::new(4)));
        assert_eq!(f.next_lesson(LessonId::new(4)), None);
        assert_eq!(
            f.previous_lesson(LessonId::new(4)).map(|l| l.id),
            Some(LessonId::new(2))
        );
        assert_eq!(f.previous_lesson(LessonId::new(1)), None);
        assert_eq!(f.next_lesson(LessonId::new(99)), None);
        assert_eq!(f.first_lesson().map(|l| l.id), Some(LessonId::new(1)));
    }

    #[test]
    fn free_lesson_detection() {
        assert!(build().has_free_lesson());
    }

    #[test]
    fn foreign_lesson_is_rejected() {
        let err = Chapter::new(
            ChapterId::new(1),
            FormationId::new(1),
            "Ch",
            0,
            vec![lesson(1, 9, 0, true)],
        )
        .unwrap_err();
        assert!(matches!(err, FormationError::ForeignLesson { .. }));
    }

    #[test]
    fn duplicate_lessons_are_rejected() {
        let fid = FormationId::new(1);
        let a = Chapter::new(ChapterId::new(1), fid, "A", 0, vec![lesson(1, 1, 0, true)]).unwrap();
        let b = Chapter::new(ChapterId::new(2), fid, "B", 1, vec![lesson(1, 2, 0, true)]).unwrap();
        let err = Formation::new(fid, FormationSlug::parse("dup").unwrap(), "Dup", vec![a, b])
            .unwrap_err();
        assert_eq!(err, FormationError::DuplicateLesson(LessonId::new(1)));
    }
}

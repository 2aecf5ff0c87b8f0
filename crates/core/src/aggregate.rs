//! Roll lesson completion up into chapter and formation percentages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{ChapterId, Formation, FormationId, Lesson, LessonId, LessonProgress};

/// Which lessons a learner may view and therefore count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonAccess {
    /// Enrolled learners see every lesson.
    Enrolled,
    /// Guests only see free lessons.
    Guest,
}

impl LessonAccess {
    #[must_use]
    pub fn from_enrolled(enrolled: bool) -> Self {
        if enrolled { Self::Enrolled } else { Self::Guest }
    }

    #[must_use]
    pub fn allows(self, lesson: &Lesson) -> bool {
        match self {
            LessonAccess::Enrolled => true,
            LessonAccess::Guest => lesson.is_free,
        }
    }
}

/// `round(100 * completed / total)`; an empty set is 0%.
#[must_use]
pub fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u128;
    let total = total as u128;
    // half-up rounding in integer space
    let pct = (200 * completed + total) / (2 * total);
    u8::try_from(pct).unwrap_or(100)
}

/// Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub chapter_id: ChapterId,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub percentage: u8,
}

/// Aggregate of one formation for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationRollup {
    pub formation_id: FormationId,
    pub chapters: Vec<ChapterProgress>,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub percentage: u8,
    pub time_spent_seconds: u64,
}

impl FormationRollup {
    /// A rollup with no chapter breakdown, from raw counts.
    #[must_use]
    pub fn from_counts(
        formation_id: FormationId,
        completed_lessons: usize,
        total_lessons: usize,
        time_spent_seconds: u64,
    ) -> Self {
        Self {
            formation_id,
            chapters: Vec::new(),
            completed_lessons,
            total_lessons,
            percentage: percentage(completed_lessons, total_lessons),
            time_spent_seconds,
        }
    }

    /// Every countable lesson is completed. Zero lessons never complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons >= self.total_lessons
    }

    #[must_use]
    pub fn chapter(&self, id: ChapterId) -> Option<&ChapterProgress> {
        self.chapters.iter().find(|c| c.chapter_id == id)
    }
}

/// Compute chapter and formation progress from the learner's progress rows.
///
/// Rows for lessons outside the formation are ignored, as are lessons the
/// learner may not view under `access`.
#[must_use]
pub fn rollup(
    formation: &Formation,
    progress: &[LessonProgress],
    access: LessonAccess,
) -> FormationRollup {
    let by_lesson: HashMap<LessonId, &LessonProgress> =
        progress.iter().map(|p| (p.lesson_id, p)).collect();

    let mut chapters = Vec::with_capacity(formation.chapters.len());
    let mut completed_total = 0_usize;
    let mut lessons_total = 0_usize;
    let mut time_spent = 0_u64;

    for chapter in &formation.chapters {
        let mut completed = 0_usize;
        let mut total = 0_usize;
        for lesson in chapter.lessons.iter().filter(|l| access.allows(l)) {
            total += 1;
            if let Some(p) = by_lesson.get(&lesson.id) {
                time_spent = time_spent.saturating_add(p.watch_time_seconds);
                if p.is_completed {
                    completed += 1;
                }
            }
        }
        chapters.push(ChapterProgress {
            chapter_id: chapter.id,
            completed_lessons: completed,
            total_lessons: total,
            percentage: percentage(completed, total),
        });
        completed_total += completed;
        lessons_total += total;
    }

    FormationRollup {
        formation_id: formation.id,
        chapters,
        completed_lessons: completed_total,
        total_lessons: lessons_total,
        percentage: percentage(completed_total, lessons_total),
        time_spent_seconds: time_spent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chapter, FormationSlug, LessonContent, UserId};
    use crate::time::fixed_now;

    fn formation(chapters: usize, per_chapter: usize, free_first: bool) -> Formation {
        let fid = FormationId::new(1);
        let mut next_lesson = 1;
        let chapters = (0..chapters)
            .map(|c| {
                let cid = ChapterId::new(c as u64 + 1);
                let lessons = (0..per_chapter)
                    .map(|p| {
                        let id = next_lesson;
                        next_lesson += 1;
                        Lesson::new(
                            LessonId::new(id),
                            cid,
                            format!("L{id}"),
                            p as u32,
                            LessonContent::video(100).unwrap(),
                            free_first && id == 1,
                        )
                        .unwrap()
                    })
                    .collect();
                Chapter::new(cid, fid, format!("C{c}"), c as u32, lessons).unwrap()
            })
            .collect();
        Formation::new(fid, FormationSlug::parse("course").unwrap(), "Course", chapters).unwrap()
    }

    fn done(lesson: u64, watch: u64) -> LessonProgress {
        let mut p = LessonProgress::empty(UserId::new(1), LessonId::new(lesson), fixed_now());
        p.is_completed = true;
        p.completion_percentage = 100.0;
        p.watch_time_seconds = watch;
        p
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(3, 12), 25);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(12, 12), 100);
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(5, 4), 100);
    }

    #[test]
    fn three_of_twelve_is_twenty_five_percent() {
        let f = formation(3, 4, false);
        let rows: Vec<_> = (1..=3).map(|id| done(id, 10)).collect();
        let r = rollup(&f, &rows, LessonAccess::Enrolled);
        assert_eq!(r.total_lessons, 12);
        assert_eq!(r.completed_lessons, 3);
        assert_eq!(r.percentage, 25);
        assert_eq!(r.time_spent_seconds, 30);
        assert_eq!(r.chapter(ChapterId::new(1)).unwrap().percentage, 75);
        assert_eq!(r.chapter(ChapterId::new(2)).unwrap().percentage, 0);
        assert!(!r.is_complete());
    }

    #[test]
    fn incomplete_rows_add_time_but_not_completion() {
        let f = formation(1, 2, false);
        let mut partial = LessonProgress::empty(UserId::new(1), LessonId::new(2), fixed_now());
        partial.watch_time_seconds = 42;
        partial.completion_percentage = 40.0;
        let r = rollup(&f, &[done(1, 8), partial], LessonAccess::Enrolled);
        assert_eq!(r.completed_lessons, 1);
        assert_eq!(r.time_spent_seconds, 50);
        assert_eq!(r.percentage, 50);
    }

    #[test]
    fn guests_only_count_free_lessons() {
        let f = formation(2, 2, true);
        let r = rollup(&f, &[done(1, 0), done(2, 0)], LessonAccess::Guest);
        assert_eq!(r.total_lessons, 1);
        assert_eq!(r.completed_lessons, 1);
        assert_eq!(r.chapter(ChapterId::new(2)).unwrap().total_lessons, 0);
        assert_eq!(r.chapter(ChapterId::new(2)).unwrap().percentage, 0);
    }

    #[test]
    fn rows_outside_formation_are_ignored() {
        let f = formation(1, 1, false);
        let r = rollup(&f, &[done(99, 500)], LessonAccess::Enrolled);
        assert_eq!(r.completed_lessons, 0);
        assert_eq!(r.time_spent_seconds, 0);
    }

    #[test]
    fn empty_formation_is_zero_and_never_complete() {
        let f = Formation::new(
            FormationId::new(5),
            FormationSlug::parse("empty").unwrap(),
            "Empty",
            Vec::new(),
        )
        .unwrap();
        let r = rollup(&f, &[], LessonAccess::Enrolled);
        assert_eq!(r.percentage, 0);
        assert!(!r.is_complete());
    }
}

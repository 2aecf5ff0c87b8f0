//! Client-side formation rollup, recomputed from the local store.

use chrono::{DateTime, Utc};

use progress_core::aggregate::{self, FormationRollup, LessonAccess};
use progress_core::model::{
    Enrollment, EnrollmentError, EnrollmentState, Formation, LessonId, LessonProgress, Transition,
};

use crate::store::Snapshot;

#[derive(Debug)]
pub struct ProgressAggregator {
    formation: Formation,
    enrollment: Option<Enrollment>,
    rollup: FormationRollup,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(formation: Formation, enrollment: Option<Enrollment>) -> Self {
        let rollup = aggregate::rollup(
            &formation,
            &[],
            LessonAccess::from_enrolled(enrollment.is_some()),
        );
        Self {
            formation,
            enrollment,
            rollup,
        }
    }

    #[must_use]
    pub fn formation(&self) -> &Formation {
        &self.formation
    }

    #[must_use]
    pub fn enrollment(&self) -> Option<&Enrollment> {
        self.enrollment.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> EnrollmentState {
        EnrollmentState::of(self.enrollment.as_ref())
    }

    #[must_use]
    pub fn access(&self) -> LessonAccess {
        LessonAccess::from_enrolled(self.enrollment.is_some())
    }

    #[must_use]
    pub fn rollup(&self) -> &FormationRollup {
        &self.rollup
    }

    /// Replace the enrollment, e.g. after enrolling or a backend refresh.
    pub fn set_enrollment(&mut self, enrollment: Option<Enrollment>) {
        self.enrollment = enrollment;
    }

    /// Recompute chapter and formation percentages from a store snapshot.
    ///
    /// Completion is only ever counted from lessons whose own
    /// `is_completed` flag is set.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError` if the enrollment belongs to another formation.
    pub fn refresh(
        &mut self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Transition, EnrollmentError> {
        let rows: Vec<LessonProgress> = snapshot
            .values()
            .filter(|p| self.formation.contains_lesson(p.lesson_id))
            .cloned()
            .collect();
        self.rollup = aggregate::rollup(&self.formation, &rows, self.access());

        match self.enrollment.as_mut() {
            Some(enrollment) => enrollment.apply_rollup(&self.rollup, now),
            None => Ok(Transition::Unchanged),
        }
    }

    /// Record the lesson being viewed; returns whether the enrollment changed.
    pub fn visit(&mut self, lesson_id: LessonId) -> bool {
        self.enrollment
            .as_mut()
            .is_some_and(|e| e.visit(lesson_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use progress_core::model::{EnrollAccess, FormationId, ProgressDelta, UserId};
    use progress_core::time::fixed_now;
    use storage::seed::demo_formation;

    fn done(lesson: u64) -> LessonProgress {
        let delta = ProgressDelta {
            position_seconds: 0.0,
            watch_time_seconds: 60,
            completion_percentage: 100.0,
            is_completed: true,
            notes: None,
        };
        LessonProgress::from_delta(UserId::new(1), LessonId::new(lesson), &delta, fixed_now())
            .unwrap()
    }

    fn snapshot(lessons: impl IntoIterator<Item = u64>) -> Snapshot {
        Arc::new(
            lessons
                .into_iter()
                .map(|id| (LessonId::new(id), done(id)))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn enrolled() -> Enrollment {
        Enrollment::enroll(UserId::new(1), FormationId::new(1), EnrollAccess::Granted, fixed_now())
            .unwrap()
    }

    #[test]
    fn enrolled_learner_counts_every_lesson() {
        let mut agg = ProgressAggregator::new(demo_formation().unwrap(), Some(enrolled()));
        let t = agg.refresh(&snapshot([1, 2, 3]), fixed_now()).unwrap();
        assert_eq!(t, Transition::Updated);
        assert_eq!(agg.rollup().percentage, 25);
        assert_eq!(agg.enrollment().unwrap().progress_percentage, 25);
        assert_eq!(agg.enrollment().unwrap().total_time_spent_seconds, 180);
    }

    #[test]
    fn guest_rollup_only_counts_free_lessons() {
        let mut agg = ProgressAggregator::new(demo_formation().unwrap(), None);
        agg.refresh(&snapshot([1, 2]), fixed_now()).unwrap();
        assert_eq!(agg.rollup().total_lessons, 1);
        assert_eq!(agg.rollup().percentage, 100);
        assert_eq!(agg.state(), EnrollmentState::NotEnrolled);
    }

    #[test]
    fn last_lesson_completes_the_enrollment() {
        let mut agg = ProgressAggregator::new(demo_formation().unwrap(), Some(enrolled()));
        agg.refresh(&snapshot(1..=11), fixed_now()).unwrap();
        assert!(!agg.enrollment().unwrap().is_completed);

        let t = agg.refresh(&snapshot(1..=12), fixed_now()).unwrap();
        assert_eq!(t, Transition::Completed);
        assert_eq!(agg.state(), EnrollmentState::Completed);
    }

    #[test]
    fn rows_of_other_formations_are_ignored() {
        let mut agg = ProgressAggregator::new(demo_formation().unwrap(), Some(enrolled()));
        agg.refresh(&snapshot([1, 99]), fixed_now()).unwrap();
        assert_eq!(agg.rollup().completed_lessons, 1);
    }

    #[test]
    fn visits_only_touch_enrolled_learners() {
        let mut guest = ProgressAggregator::new(demo_formation().unwrap(), None);
        assert!(!guest.visit(LessonId::new(1)));

        let mut agg = ProgressAggregator::new(demo_formation().unwrap(), Some(enrolled()));
        assert!(agg.visit(LessonId::new(2)));
        assert!(!agg.visit(LessonId::new(2)));
    }
}

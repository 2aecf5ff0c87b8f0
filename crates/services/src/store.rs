//! Client-side progress cache with a single writer.
//!
//! [`ProgressStore`] is the only handle that can mutate the cache and it is
//! not `Clone`: whoever drives the active viewing session holds it. Readers
//! (UI, resume resolution) get a [`StoreReader`] and only ever see immutable
//! snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use progress_core::model::{LessonId, LessonProgress, ProgressDelta, ProgressError, UserId};

/// Immutable view of every cached record.
pub type Snapshot = Arc<HashMap<LessonId, LessonProgress>>;

/// Local write counters of one lesson.
#[derive(Debug, Clone, Copy, Default)]
struct Revision {
    local: u64,
    synced: u64,
}

impl Revision {
    fn is_dirty(self) -> bool {
        self.synced < self.local
    }
}

/// A cached record the backend has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsyncedWrite {
    pub lesson_id: LessonId,
    /// Store revision the delta was taken at.
    pub revision: u64,
    pub delta: ProgressDelta,
}

pub struct ProgressStore {
    user_id: UserId,
    tx: watch::Sender<Snapshot>,
    revisions: HashMap<LessonId, Revision>,
}

/// Cloneable read access to a [`ProgressStore`].
#[derive(Clone)]
pub struct StoreReader {
    rx: watch::Receiver<Snapshot>,
}

impl ProgressStore {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self {
            user_id,
            tx,
            revisions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.tx.borrow())
    }

    #[must_use]
    pub fn get(&self, lesson_id: LessonId) -> Option<LessonProgress> {
        self.tx.borrow().get(&lesson_id).cloned()
    }

    /// Number of optimistic writes applied to a lesson so far.
    #[must_use]
    pub fn revision(&self, lesson_id: LessonId) -> u64 {
        self.revisions.get(&lesson_id).map_or(0, |r| r.local)
    }

    /// Apply an update before the backend confirms it.
    ///
    /// Uses the same monotonic merge as the backend, so completion never
    /// goes backwards locally either. The lesson stays unsynced until an
    /// echo of this revision is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` for out-of-range values; the cache is untouched.
    pub fn apply_optimistic(
        &mut self,
        lesson_id: LessonId,
        delta: &ProgressDelta,
        now: DateTime<Utc>,
    ) -> Result<LessonProgress, ProgressError> {
        let next = match self.get(lesson_id) {
            Some(mut existing) => {
                existing.merge(delta, now)?;
                existing
            }
            None => LessonProgress::from_delta(self.user_id, lesson_id, delta, now)?,
        };
        self.put(next.clone());
        self.revisions.entry(lesson_id).or_default().local += 1;
        Ok(next)
    }

    /// Fold in a record fetched from the backend.
    ///
    /// Monotonic fields take the maximum of both sides. Position and notes
    /// come from the echo unless the lesson has unsynced local writes, which
    /// are newer than anything the backend can know about.
    pub fn reconcile(&mut self, echo: &LessonProgress) -> LessonProgress {
        let local_is_newer = self
            .revisions
            .get(&echo.lesson_id)
            .is_some_and(|r| r.is_dirty());
        self.fold(echo, local_is_newer)
    }

    /// Fold in the backend's answer to the write taken at `revision`.
    ///
    /// Optimistic writes applied after `revision` keep their position.
    pub fn acknowledge(&mut self, echo: &LessonProgress, revision: u64) -> LessonProgress {
        let rev = self.revisions.entry(echo.lesson_id).or_default();
        let local_is_newer = revision < rev.local;
        rev.synced = rev.synced.max(revision);
        self.fold(echo, local_is_newer)
    }

    /// Stop tracking a write the backend refused; resending it cannot succeed.
    pub fn mark_synced(&mut self, lesson_id: LessonId, revision: u64) {
        let rev = self.revisions.entry(lesson_id).or_default();
        rev.synced = rev.synced.max(revision);
    }

    /// Lessons with local writes the backend has not confirmed, as full
    /// replacement deltas.
    #[must_use]
    pub fn unsynced(&self) -> Vec<UnsyncedWrite> {
        let snapshot = self.tx.borrow();
        let mut pending: Vec<UnsyncedWrite> = self
            .revisions
            .iter()
            .filter(|(_, rev)| rev.is_dirty())
            .filter_map(|(lesson_id, rev)| {
                snapshot.get(lesson_id).map(|record| UnsyncedWrite {
                    lesson_id: *lesson_id,
                    revision: rev.local,
                    delta: record.to_delta(),
                })
            })
            .collect();
        pending.sort_by_key(|w| w.lesson_id);
        pending
    }

    /// Load records fetched on page load.
    pub fn load<'a>(&mut self, records: impl IntoIterator<Item = &'a LessonProgress>) {
        for record in records {
            self.reconcile(record);
        }
    }

    fn fold(&mut self, echo: &LessonProgress, local_is_newer: bool) -> LessonProgress {
        let next = match self.get(echo.lesson_id) {
            None => echo.clone(),
            Some(local) => {
                let (mut base, newer) = if local_is_newer {
                    (echo.clone(), local)
                } else {
                    (local, echo.clone())
                };
                match base.reconcile(&newer) {
                    Ok(()) => base,
                    Err(_) => echo.clone(),
                }
            }
        };
        self.put(next.clone());
        next
    }

    fn put(&mut self, record: LessonProgress) {
        self.tx.send_modify(|snapshot| {
            Arc::make_mut(snapshot).insert(record.lesson_id, record);
        });
    }
}

impl StoreReader {
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.rx.borrow())
    }

    #[must_use]
    pub fn get(&self, lesson_id: LessonId) -> Option<LessonProgress> {
        self.rx.borrow().get(&lesson_id).cloned()
    }

    /// Wait for the next write to the store.
    ///
    /// Returns `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::time::fixed_now;

    fn delta(position: f64, pct: f64, done: bool) -> ProgressDelta {
        ProgressDelta {
            position_seconds: position,
            watch_time_seconds: position as u64,
            completion_percentage: pct,
            is_completed: done,
            notes: None,
        }
    }

    #[test]
    fn optimistic_updates_are_monotonic() {
        let mut store = ProgressStore::new(UserId::new(1));
        let lesson = LessonId::new(4);
        store
            .apply_optimistic(lesson, &delta(95.0, 95.0, true), fixed_now())
            .unwrap();
        let after = store
            .apply_optimistic(lesson, &delta(5.0, 5.0, false), fixed_now())
            .unwrap();
        assert!(after.is_completed);
        assert_eq!(after.completion_percentage, 95.0);
        assert_eq!(after.position_seconds, 5.0);
    }

    #[test]
    fn readers_see_snapshots_not_live_state() {
        let mut store = ProgressStore::new(UserId::new(1));
        let reader = store.reader();
        let lesson = LessonId::new(1);

        store
            .apply_optimistic(lesson, &delta(10.0, 10.0, false), fixed_now())
            .unwrap();
        let before = reader.snapshot();
        store
            .apply_optimistic(lesson, &delta(20.0, 20.0, false), fixed_now())
            .unwrap();

        assert_eq!(before.get(&lesson).unwrap().position_seconds, 10.0);
        assert_eq!(reader.get(lesson).unwrap().position_seconds, 20.0);
    }

    fn record(lesson: LessonId, position: f64, pct: f64, done: bool) -> LessonProgress {
        LessonProgress::from_delta(
            UserId::new(1),
            lesson,
            &delta(position, pct, done),
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn stale_echo_keeps_local_completion() {
        let mut store = ProgressStore::new(UserId::new(1));
        let lesson = LessonId::new(1);
        let echo = record(lesson, 40.0, 40.0, false);
        store
            .apply_optimistic(lesson, &delta(92.0, 92.0, true), fixed_now())
            .unwrap();

        let merged = store.reconcile(&echo);
        assert!(merged.is_completed);
        assert_eq!(merged.completion_percentage, 92.0);
        // unsynced local writes are newer than the fetched record
        assert_eq!(merged.position_seconds, 92.0);
    }

    #[test]
    fn synced_lesson_takes_the_fetched_position() {
        let mut store = ProgressStore::new(UserId::new(1));
        let lesson = LessonId::new(1);
        store
            .apply_optimistic(lesson, &delta(30.0, 30.0, false), fixed_now())
            .unwrap();
        let rev = store.revision(lesson);
        store.acknowledge(&record(lesson, 30.0, 30.0, false), rev);

        // another device rewound the lesson
        let merged = store.reconcile(&record(lesson, 12.0, 12.0, false));
        assert_eq!(merged.position_seconds, 12.0);
        assert_eq!(merged.completion_percentage, 30.0);
    }

    #[test]
    fn echo_of_an_older_write_keeps_the_newer_position() {
        let mut store = ProgressStore::new(UserId::new(1));
        let lesson = LessonId::new(2);
        store
            .apply_optimistic(lesson, &delta(10.0, 10.0, false), fixed_now())
            .unwrap();
        let in_flight = store.revision(lesson);
        store
            .apply_optimistic(lesson, &delta(20.0, 20.0, false), fixed_now())
            .unwrap();

        let merged = store.acknowledge(&record(lesson, 10.0, 10.0, false), in_flight);
        assert_eq!(merged.position_seconds, 20.0);
        assert_eq!(merged.completion_percentage, 20.0);
        assert_eq!(store.unsynced().len(), 1);

        let latest = store.revision(lesson);
        let merged = store.acknowledge(&record(lesson, 20.0, 20.0, false), latest);
        assert_eq!(merged.position_seconds, 20.0);
        assert!(store.unsynced().is_empty());
    }

    #[test]
    fn unsynced_lists_full_records_until_confirmed() {
        let mut store = ProgressStore::new(UserId::new(1));
        let (a, b) = (LessonId::new(3), LessonId::new(1));
        store
            .apply_optimistic(a, &delta(0.0, 100.0, true), fixed_now())
            .unwrap();
        store
            .apply_optimistic(b, &delta(15.0, 3.0, false), fixed_now())
            .unwrap();
        store.load([&record(LessonId::new(7), 5.0, 5.0, false)]);

        let pending = store.unsynced();
        assert_eq!(
            pending.iter().map(|w| w.lesson_id).collect::<Vec<_>>(),
            vec![b, a]
        );
        assert!(pending[1].delta.is_completed);
        assert_eq!(pending[1].delta.notes.as_deref(), Some(""));

        store.mark_synced(a, pending[1].revision);
        store.acknowledge(&record(b, 15.0, 3.0, false), pending[0].revision);
        assert!(store.unsynced().is_empty());
    }

    #[test]
    fn echo_for_unknown_lesson_is_inserted() {
        let mut store = ProgressStore::new(UserId::new(1));
        let echo = LessonProgress::from_delta(
            UserId::new(1),
            LessonId::new(9),
            &delta(1.0, 1.0, false),
            fixed_now(),
        )
        .unwrap();
        store.load([&echo]);
        assert!(store.unsynced().is_empty());
        assert_eq!(store.get(LessonId::new(9)), Some(echo));
    }

    #[test]
    fn invalid_update_leaves_cache_untouched() {
        let mut store = ProgressStore::new(UserId::new(1));
        assert!(
            store
                .apply_optimistic(LessonId::new(1), &delta(-1.0, 0.0, false), fixed_now())
                .is_err()
        );
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn readers_are_notified_of_writes() {
        let mut store = ProgressStore::new(UserId::new(1));
        let mut reader = store.reader();
        store
            .apply_optimistic(LessonId::new(1), &delta(3.0, 3.0, false), fixed_now())
            .unwrap();
        assert!(reader.changed().await);
        drop(store);
        assert!(!reader.changed().await);
    }
}

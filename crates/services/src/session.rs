//! One lesson-viewing session: samples in, debounced upserts out.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use progress_core::Clock;
use progress_core::completion::{self, Completion};
use progress_core::model::{
    Lesson, LessonId, LessonProgress, ProgressDelta, ProgressError, ViewingSessionId,
};

use crate::config::SyncConfig;
use crate::debouncer::{Delivery, PendingWrite, ProgressDebouncer};
use crate::position::{EndReason, PlaybackEvent, PositionSample, PositionSource};
use crate::store::ProgressStore;
use crate::sync_client::{ProgressSyncClient, SyncOutcome};

/// Longest gap between two playing samples that still counts as watching.
pub const DEFAULT_MAX_SAMPLE_GAP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub window: Duration,
    pub max_wait: Duration,
    pub max_sample_gap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SessionConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            window: config.debounce_window,
            max_wait: config.debounce_max_wait,
            max_sample_gap: DEFAULT_MAX_SAMPLE_GAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: ViewingSessionId,
    pub lesson_id: LessonId,
    pub end: EndReason,
    /// Upserts handed to the sync client.
    pub writes: usize,
    pub acknowledged: usize,
    /// Local record after the session.
    pub last: Option<LessonProgress>,
    /// Credentials were found invalid during this session.
    pub auth_lost: bool,
}

/// A dispatched write, the store revision it carries, and its outcome.
type Settled = (PendingWrite, u64, SyncOutcome);
type InFlight = Pin<Box<dyn Future<Output = Settled> + Send>>;

fn dispatch(
    sync: &ProgressSyncClient,
    lesson_id: LessonId,
    write: PendingWrite,
    revision: u64,
) -> InFlight {
    let sync = sync.clone();
    Box::pin(async move {
        let outcome = sync.upsert(lesson_id, &write.delta).await;
        (write, revision, outcome)
    })
}

async fn wait_in_flight(slot: &mut Option<InFlight>) -> Settled {
    match slot {
        Some(write) => write.await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Seconds actually spent playing, from wall-clock gaps between samples.
#[derive(Debug, Default)]
struct WatchClock {
    base: u64,
    watched: Duration,
    last_playing: Option<Instant>,
}

impl WatchClock {
    fn new(base: u64) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    fn observe(&mut self, sample: &PositionSample, max_gap: Duration) -> u64 {
        if let Some(prev) = self.last_playing {
            self.watched += sample.at.saturating_duration_since(prev).min(max_gap);
        }
        self.last_playing = sample.playing.then_some(sample.at);
        self.base.saturating_add(self.watched.as_secs())
    }
}

/// Drive a viewing session until the source ends and the last write settles.
///
/// Every sample is applied to `store` optimistically; the debounced upserts
/// reconcile it with the backend's record. Sync failures never abort the
/// session.
pub async fn run_session(
    lesson: &Lesson,
    source: &mut dyn PositionSource,
    store: &mut ProgressStore,
    sync: &ProgressSyncClient,
    clock: &Clock,
    config: SessionConfig,
) -> SessionReport {
    let session_id = ViewingSessionId::new_random();
    let fallback_duration = lesson.content.duration_seconds().map(f64::from);
    let mut debouncer = ProgressDebouncer::new(config.window, config.max_wait);
    let mut watch = WatchClock::new(store.get(lesson.id).map_or(0, |p| p.watch_time_seconds));
    let mut in_flight: Option<InFlight> = None;
    let mut was_playing = false;
    let mut end: Option<EndReason> = None;
    let mut writes = 0_usize;
    let mut acknowledged = 0_usize;
    let mut auth_lost = false;

    debug!(session_id = %session_id, lesson_id = %lesson.id, "viewing session started");

    loop {
        if end.is_some() && debouncer.is_finished() && in_flight.is_none() {
            break;
        }

        let mut next = None;
        tokio::select! {
            (write, revision, outcome) = wait_in_flight(&mut in_flight) => {
                in_flight = None;
                let seq = write.seq;
                let (delivery, failed) = match outcome {
                    SyncOutcome::Synced(echo) => {
                        acknowledged += 1;
                        store.acknowledge(&echo, revision);
                        (Delivery::Acknowledged, None)
                    }
                    SyncOutcome::Deferred(_) => (Delivery::Retry, Some(write)),
                    SyncOutcome::AuthLost => {
                        auth_lost = true;
                        (Delivery::Discard, None)
                    }
                    SyncOutcome::Rejected(_) => {
                        store.mark_synced(lesson.id, revision);
                        (Delivery::Discard, None)
                    }
                    SyncOutcome::Skipped => (Delivery::Discard, None),
                };
                next = debouncer.finish(seq, delivery, failed);
            }
            event = source.next_event(), if end.is_none() => {
                match event {
                    Some(PlaybackEvent::Sample(raw)) => {
                        let sample = raw.sanitized(fallback_duration);
                        let watch_time = watch.observe(&sample, config.max_sample_gap);
                        match record_sample(lesson, &sample, watch_time, store, clock) {
                            Ok(delta) => {
                                debouncer.record(delta, sample.at);
                            }
                            Err(e) => warn!(lesson_id = %lesson.id, error = %e, "sample dropped"),
                        }
                        if was_playing && !sample.playing {
                            next = debouncer.force_flush();
                        }
                        was_playing = sample.playing;
                    }
                    Some(PlaybackEvent::Ended(reason)) => {
                        end = Some(reason);
                        next = debouncer.close(reason);
                    }
                    None => {
                        end = Some(EndReason::Teardown);
                        next = debouncer.close(EndReason::Teardown);
                    }
                }
            }
            () = wait_deadline(debouncer.next_deadline()) => {
                next = debouncer.poll_due(Instant::now());
            }
        }

        if let Some(write) = next {
            writes += 1;
            // samples are applied to the store before they reach the
            // debouncer, so the current revision covers this delta
            in_flight = Some(dispatch(sync, lesson.id, write, store.revision(lesson.id)));
        }
    }

    let end = end.unwrap_or(EndReason::Teardown);
    let last = store.get(lesson.id);
    info!(
        session_id = %session_id,
        lesson_id = %lesson.id,
        writes,
        acknowledged,
        completed = last.as_ref().is_some_and(|p| p.is_completed),
        "viewing session ended"
    );

    SessionReport {
        session_id,
        lesson_id: lesson.id,
        end,
        writes,
        acknowledged,
        last,
        auth_lost,
    }
}

/// Evaluate a sample and apply it to the local store.
fn record_sample(
    lesson: &Lesson,
    sample: &PositionSample,
    watch_time_seconds: u64,
    store: &mut ProgressStore,
    clock: &Clock,
) -> Result<ProgressDelta, ProgressError> {
    let prior = store
        .get(lesson.id)
        .map_or_else(Completion::default, |p| p.completion());
    let completion = if lesson.content.is_timed() {
        completion::evaluate_position(
            sample.position_seconds,
            sample.duration_seconds,
            prior.is_completed,
        )
        .max(prior)
    } else {
        completion::evaluate(&lesson.content, sample.position_seconds, prior)
    };

    let delta = ProgressDelta {
        position_seconds: sample.position_seconds,
        watch_time_seconds,
        completion_percentage: completion.percentage,
        is_completed: completion.is_completed,
        notes: None,
    };
    store.apply_optimistic(lesson.id, &delta, clock.now())?;
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(at: Instant, playing: bool) -> PositionSample {
        PositionSample {
            at,
            position_seconds: 0.0,
            duration_seconds: 100.0,
            playing,
        }
    }

    #[test]
    fn watch_time_counts_only_playing_gaps() {
        let t0 = Instant::now();
        let gap = Duration::from_secs(5);
        let mut watch = WatchClock::new(100);

        assert_eq!(watch.observe(&sample(t0, true), gap), 100);
        assert_eq!(watch.observe(&sample(t0 + Duration::from_secs(3), true), gap), 103);
        // paused: the gap up to the pause still counts, the pause does not
        assert_eq!(watch.observe(&sample(t0 + Duration::from_secs(4), false), gap), 104);
        assert_eq!(watch.observe(&sample(t0 + Duration::from_secs(60), true), gap), 104);
        assert_eq!(watch.observe(&sample(t0 + Duration::from_secs(62), true), gap), 106);
    }

    #[test]
    fn long_gaps_are_capped() {
        let t0 = Instant::now();
        let mut watch = WatchClock::new(0);
        watch.observe(&sample(t0, true), Duration::from_secs(5));
        assert_eq!(
            watch.observe(&sample(t0 + Duration::from_secs(90), true), Duration::from_secs(5)),
            5
        );
    }
}

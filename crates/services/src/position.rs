//! Playback surfaces that report position samples.
//!
//! A [`PositionSource`] wraps either a native media element (driven through
//! a channel), an external embed that posts millisecond based messages, or a
//! simulated playback used by the CLI and tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

//
// ─── SAMPLES ───────────────────────────────────────────────────────────────────
//

/// One raw observation of a playback surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub at: Instant,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub playing: bool,
}

impl PositionSample {
    /// Clamp the position into `[0, duration]`.
    ///
    /// Non-finite positions become 0. When the surface reports no usable
    /// duration, `fallback_duration` (the catalog duration) is used instead.
    #[must_use]
    pub fn sanitized(mut self, fallback_duration: Option<f64>) -> Self {
        if !(self.duration_seconds.is_finite() && self.duration_seconds > 0.0) {
            self.duration_seconds = fallback_duration.unwrap_or(0.0);
        }
        let position = if self.position_seconds.is_finite() {
            self.position_seconds.max(0.0)
        } else {
            0.0
        };
        self.position_seconds = if self.duration_seconds > 0.0 {
            position.min(self.duration_seconds)
        } else {
            position
        };
        self
    }
}

/// Why a viewing session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LessonChange,
    NavigateAway,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Sample(PositionSample),
    Ended(EndReason),
}

/// Control calls a source received, in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceControl {
    Seek(f64),
    Start,
}

/// A playback surface.
#[async_trait]
pub trait PositionSource: Send {
    /// Move the playhead. Called before [`PositionSource::start`] when resuming.
    async fn seek(&mut self, position_seconds: f64);

    /// Enable playback.
    async fn start(&mut self);

    /// Next event; `None` means the surface was torn down.
    async fn next_event(&mut self) -> Option<PlaybackEvent>;
}

//
// ─── NATIVE ELEMENT ────────────────────────────────────────────────────────────
//

/// Snapshot of the controls applied to a native element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ElementControls {
    pub seek_to: Option<f64>,
    pub playback_enabled: bool,
}

/// Source fed by a native media element through a channel.
pub struct ChannelSource {
    events: mpsc::Receiver<PlaybackEvent>,
    controls: watch::Sender<ElementControls>,
}

/// Element side of a [`ChannelSource`].
#[derive(Clone)]
pub struct ElementHandle {
    events: mpsc::Sender<PlaybackEvent>,
    controls: watch::Receiver<ElementControls>,
}

impl ChannelSource {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ElementHandle) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (controls_tx, controls_rx) = watch::channel(ElementControls::default());
        (
            Self {
                events: events_rx,
                controls: controls_tx,
            },
            ElementHandle {
                events: events_tx,
                controls: controls_rx,
            },
        )
    }
}

#[async_trait]
impl PositionSource for ChannelSource {
    async fn seek(&mut self, position_seconds: f64) {
        self.controls
            .send_modify(|c| c.seek_to = Some(position_seconds));
    }

    async fn start(&mut self) {
        self.controls.send_modify(|c| c.playback_enabled = true);
    }

    async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }
}

impl ElementHandle {
    /// Report a sample stamped now. Returns `false` once the session is gone.
    pub async fn report(&self, position_seconds: f64, duration_seconds: f64, playing: bool) -> bool {
        let sample = PositionSample {
            at: Instant::now(),
            position_seconds,
            duration_seconds,
            playing,
        };
        self.events.send(PlaybackEvent::Sample(sample)).await.is_ok()
    }

    pub async fn end(&self, reason: EndReason) -> bool {
        self.events.send(PlaybackEvent::Ended(reason)).await.is_ok()
    }

    #[must_use]
    pub fn controls(&self) -> ElementControls {
        *self.controls.borrow()
    }
}

//
// ─── EMBED ─────────────────────────────────────────────────────────────────────
//

/// Message posted by an external player embed.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EmbedMessage {
    #[serde(rename_all = "camelCase")]
    TimeUpdate { current_time_ms: u64, duration_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Pause { current_time_ms: u64, duration_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Ended { duration_ms: u64 },
    Unload,
}

/// Commands sent to an external embed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmbedCommand {
    SeekMs(u64),
    Play,
}

/// Source wrapping an external embed speaking [`EmbedMessage`]s.
pub struct EmbedSource {
    messages: mpsc::Receiver<EmbedMessage>,
    commands: mpsc::UnboundedSender<EmbedCommand>,
}

impl EmbedSource {
    #[must_use]
    pub fn new(
        messages: mpsc::Receiver<EmbedMessage>,
        commands: mpsc::UnboundedSender<EmbedCommand>,
    ) -> Self {
        Self { messages, commands }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ms_to_seconds(ms: u64) -> f64 {
    ms as f64 / 1_000.0
}

impl EmbedMessage {
    /// Translate into a playback event stamped `at`.
    #[must_use]
    pub fn into_event(self, at: Instant) -> PlaybackEvent {
        let sample = |current_ms: u64, duration_ms: u64, playing: bool| {
            PlaybackEvent::Sample(PositionSample {
                at,
                position_seconds: ms_to_seconds(current_ms),
                duration_seconds: ms_to_seconds(duration_ms),
                playing,
            })
        };
        match self {
            EmbedMessage::TimeUpdate {
                current_time_ms,
                duration_ms,
            } => sample(current_time_ms, duration_ms, true),
            EmbedMessage::Pause {
                current_time_ms,
                duration_ms,
            } => sample(current_time_ms, duration_ms, false),
            EmbedMessage::Ended { duration_ms } => sample(duration_ms, duration_ms, false),
            EmbedMessage::Unload => PlaybackEvent::Ended(EndReason::NavigateAway),
        }
    }
}

#[async_trait]
impl PositionSource for EmbedSource {
    async fn seek(&mut self, position_seconds: f64) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = (position_seconds.max(0.0) * 1_000.0).round() as u64;
        // a closed embed has nothing left to seek
        let _ = self.commands.send(EmbedCommand::SeekMs(ms));
    }

    async fn start(&mut self) {
        let _ = self.commands.send(EmbedCommand::Play);
    }

    async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.messages
            .recv()
            .await
            .map(|m| m.into_event(Instant::now()))
    }
}

//
// ─── SIMULATED ─────────────────────────────────────────────────────────────────
//

/// Plays from the seek position up to `to` in steps of `step` media seconds,
/// one step per `interval`, then pauses and ends with `end`.
pub struct SimulatedPlayback {
    duration_seconds: f64,
    position: f64,
    to: f64,
    step: f64,
    interval: Duration,
    next_at: Option<Instant>,
    end: EndReason,
    started: bool,
    queue: VecDeque<PlaybackEvent>,
    finished: bool,
    controls: Vec<SourceControl>,
}

impl SimulatedPlayback {
    #[must_use]
    pub fn new(duration_seconds: f64, to: f64, step: f64, interval: Duration) -> Self {
        Self {
            duration_seconds,
            position: 0.0,
            to: to.clamp(0.0, duration_seconds.max(0.0)),
            step: if step > 0.0 { step } else { 1.0 },
            interval,
            next_at: None,
            end: EndReason::NavigateAway,
            started: false,
            queue: VecDeque::new(),
            finished: false,
            controls: Vec::new(),
        }
    }

    #[must_use]
    pub fn ending_with(mut self, end: EndReason) -> Self {
        self.end = end;
        self
    }

    /// Controls received so far, in order.
    #[must_use]
    pub fn controls(&self) -> &[SourceControl] {
        &self.controls
    }

    fn sample(&self, playing: bool) -> PlaybackEvent {
        PlaybackEvent::Sample(PositionSample {
            at: Instant::now(),
            position_seconds: self.position,
            duration_seconds: self.duration_seconds,
            playing,
        })
    }
}

#[async_trait]
impl PositionSource for SimulatedPlayback {
    async fn seek(&mut self, position_seconds: f64) {
        self.controls.push(SourceControl::Seek(position_seconds));
        self.position = position_seconds.clamp(0.0, self.duration_seconds.max(0.0));
    }

    async fn start(&mut self) {
        self.controls.push(SourceControl::Start);
        self.started = true;
    }

    async fn next_event(&mut self) -> Option<PlaybackEvent> {
        if let Some(event) = self.queue.pop_front() {
            return Some(event);
        }
        if !self.started || self.finished {
            return None;
        }
        if self.position < self.to {
            // the tick deadline survives cancellation inside select!
            let at = *self.next_at.get_or_insert_with(|| Instant::now() + self.interval);
            tokio::time::sleep_until(at).await;
            self.next_at = None;
            self.position = (self.position + self.step).min(self.to);
            return Some(self.sample(true));
        }
        self.finished = true;
        self.queue.push_back(PlaybackEvent::Ended(self.end));
        Some(self.sample(false))
    }
}

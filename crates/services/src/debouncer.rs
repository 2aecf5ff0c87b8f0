//! Coalesces high-frequency progress updates into sparse writes.
//!
//! The debouncer is a plain state machine over a single pending-write slot:
//!
//! ```text
//!            record                 deadline / force / close
//!   Idle ───────────────► Pending ──────────────────────────► Flushing
//!    ▲                      ▲                                    │
//!    │                      └────── finish (newer slot armed) ◄──┤
//!    └─────────────────────────────  finish (slot empty)  ◄──────┘
//! ```
//!
//! It owns no timer. The session runner asks for [`ProgressDebouncer::next_deadline`],
//! sleeps until then and calls [`ProgressDebouncer::poll_due`]. At most one
//! write is in flight; anything recorded meanwhile waits in the slot and always
//! carries a higher sequence number than the write in flight.

use std::time::Duration;

use tokio::time::Instant;

use progress_core::model::ProgressDelta;

use crate::position::EndReason;

/// Default quiet period before a pending write is flushed.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(2);

/// Default upper bound between the first pending update and its flush.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);

/// A write waiting for (or undergoing) delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Logical timestamp; strictly increasing per session.
    pub seq: u64,
    pub delta: ProgressDelta,
}

impl PendingWrite {
    /// Replace with a newer write, keeping notes the newer one does not carry.
    fn supersede(&mut self, mut newer: PendingWrite) {
        if newer.delta.notes.is_none() {
            newer.delta.notes = self.delta.notes.take();
        }
        *self = newer;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
    Flushing { in_flight: u64 },
}

/// What happened to the write in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored by the backend.
    Acknowledged,
    /// Transient failure; keep it for the next cycle.
    Retry,
    /// Refused or undeliverable; drop it.
    Discard,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    since: Instant,
    deadline: Instant,
}

#[derive(Debug)]
pub struct ProgressDebouncer {
    window: Duration,
    max_wait: Duration,
    state: DebounceState,
    slot: Option<PendingWrite>,
    armed: Option<Armed>,
    next_seq: u64,
    acknowledged: Option<u64>,
    flush_requested: bool,
    closed: Option<EndReason>,
}

impl Default for ProgressDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_WAIT)
    }
}

impl ProgressDebouncer {
    #[must_use]
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait: max_wait.max(window),
            state: DebounceState::Idle,
            slot: None,
            armed: None,
            next_seq: 1,
            acknowledged: None,
            flush_requested: false,
            closed: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> DebounceState {
        self.state
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingWrite> {
        self.slot.as_ref()
    }

    /// Highest sequence number the backend acknowledged.
    #[must_use]
    pub fn acknowledged(&self) -> Option<u64> {
        self.acknowledged
    }

    #[must_use]
    pub fn closed(&self) -> Option<EndReason> {
        self.closed
    }

    /// Closed, nothing in flight and nothing left to send.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.closed.is_some()
            && self.slot.is_none()
            && !matches!(self.state, DebounceState::Flushing { .. })
    }

    /// When the pending write is due, if a timer is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Put the latest update into the slot and (re)arm the quiet-period timer.
    ///
    /// Returns the assigned sequence number, or `None` once closed.
    pub fn record(&mut self, delta: ProgressDelta, now: Instant) -> Option<u64> {
        if self.closed.is_some() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let write = PendingWrite { seq, delta };
        match &mut self.slot {
            Some(existing) => existing.supersede(write),
            None => self.slot = Some(write),
        }

        let since = self.armed.map_or(now, |a| a.since);
        let deadline = (now + self.window).min(since + self.max_wait);
        self.armed = Some(Armed { since, deadline });
        if !matches!(self.state, DebounceState::Flushing { .. }) {
            self.state = DebounceState::Pending { deadline };
        }
        Some(seq)
    }

    /// Take the pending write if its deadline passed.
    pub fn poll_due(&mut self, now: Instant) -> Option<PendingWrite> {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => self.begin_flush(),
            _ => None,
        }
    }

    /// Flush right away (pause, explicit action). If a write is in flight the
    /// slot is sent as soon as it settles.
    pub fn force_flush(&mut self) -> Option<PendingWrite> {
        if matches!(self.state, DebounceState::Flushing { .. }) {
            self.flush_requested = self.slot.is_some();
            return None;
        }
        self.begin_flush()
    }

    /// End the session. Cancels the timer and returns the final write, if any.
    ///
    /// Later [`ProgressDebouncer::record`] calls are ignored.
    pub fn close(&mut self, reason: EndReason) -> Option<PendingWrite> {
        if self.closed.is_none() {
            self.closed = Some(reason);
        }
        self.force_flush()
    }

    /// Settle the write in flight and return the next write to send
    /// immediately, if one was requested meanwhile.
    ///
    /// A write that failed transiently goes back into the slot unless a newer
    /// one is already waiting; it is not re-armed, so it is retried with the
    /// next recorded update or on close. After close it is dropped.
    pub fn finish(
        &mut self,
        seq: u64,
        delivery: Delivery,
        failed: Option<PendingWrite>,
    ) -> Option<PendingWrite> {
        if self.state != (DebounceState::Flushing { in_flight: seq }) {
            return None;
        }

        match (delivery, failed) {
            (Delivery::Acknowledged, _) => {
                self.acknowledged = Some(self.acknowledged.map_or(seq, |a| a.max(seq)));
            }
            (Delivery::Retry, Some(failed)) if self.closed.is_none() => match &mut self.slot {
                None => self.slot = Some(failed),
                Some(newer) => {
                    if newer.delta.notes.is_none() {
                        newer.delta.notes = failed.delta.notes;
                    }
                }
            },
            _ => {}
        }

        let send_now = self.slot.is_some()
            && (self.closed.is_some() || (self.flush_requested && delivery != Delivery::Retry));
        if send_now {
            return self.begin_flush();
        }

        self.flush_requested = false;
        self.state = match (self.slot.is_some(), self.armed) {
            (true, Some(armed)) => DebounceState::Pending {
                deadline: armed.deadline,
            },
            _ => DebounceState::Idle,
        };
        None
    }

    fn begin_flush(&mut self) -> Option<PendingWrite> {
        let write = self.slot.take()?;
        self.armed = None;
        self.flush_requested = false;
        self.state = DebounceState::Flushing {
            in_flight: write.seq,
        };
        Some(write)
    }
}

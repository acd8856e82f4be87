//! Reconnect and stall supervision
//!
//! Pure-logic policies driven by the session: no I/O, no timers of
//! their own. The reconnect policy bounds retry attempts after a
//! connection loss; the stall monitor tracks queue starvation against a
//! grace window and decides when playback is stalled, recovered, or out
//! of recovery attempts. Callers feed observations in and act on the
//! returned decisions, which keeps both policies directly testable.

use crate::metrics::StallRecord;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bounded reconnect attempt counter.
///
/// One attempt is one full retry cycle after a loss. Reaching
/// `Buffering` again resets the counter to zero.
#[derive(Debug)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    /// Register the next reconnect attempt.
    ///
    /// Returns the attempt number (1-based), or `None` once attempts are
    /// exhausted — at which point the attempt counter stays at the
    /// configured maximum.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.attempts >= self.max_attempts {
            warn!(
                attempts = self.attempts,
                "Reconnect attempts exhausted"
            );
            return None;
        }
        self.attempts += 1;
        info!(
            attempt = self.attempts,
            max = self.max_attempts,
            "Scheduling reconnect"
        );
        Some(self.attempts)
    }

    /// Reset after a successful reconnection (session reached Buffering).
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            debug!(attempts = self.attempts, "Reconnect counter reset");
        }
        self.attempts = 0;
    }

    /// Attempts used since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Decision from one stall-monitor observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallTick {
    /// Queue healthy, nothing to do
    Healthy,
    /// Starvation just exceeded the grace window; enter `Stalled`
    StallStarted,
    /// Still stalled, within recovery bounds
    Stalling,
    /// Queue refilled to the playback threshold; return to `Playing`.
    /// Carries the recovery attempts consumed, reported exactly once
    /// per episode.
    Recovered(u32),
    /// Recovery attempts exhausted; escalate to `Failed`
    Exhausted,
}

#[derive(Debug)]
enum StallPhase {
    Healthy,
    /// Queue went empty; grace window running
    EmptySince(Instant),
    /// Stall declared; waiting for the queue to refill
    Stalled { since: Instant, attempts: u32 },
}

/// Tracks queue starvation while the session is playing.
///
/// An empty queue only becomes a stall after `grace` elapses — transient
/// underruns inside the window never surface. Once stalled, each further
/// `grace` period counts one recovery attempt; exceeding `max_recoveries`
/// escalates. Recovery means the queue refilled to `min_buffers`.
#[derive(Debug)]
pub struct StallMonitor {
    grace: Duration,
    min_buffers: usize,
    max_recoveries: u32,
    phase: StallPhase,
    record: StallRecord,
}

impl StallMonitor {
    pub fn new(grace: Duration, min_buffers: usize, max_recoveries: u32) -> Self {
        Self {
            grace,
            min_buffers,
            max_recoveries,
            phase: StallPhase::Healthy,
            record: StallRecord::default(),
        }
    }

    /// Feed one observation of the queue fill level.
    pub fn observe(&mut self, buffered: usize, now: Instant) -> StallTick {
        match self.phase {
            StallPhase::Healthy => {
                if buffered == 0 {
                    self.phase = StallPhase::EmptySince(now);
                }
                StallTick::Healthy
            }
            StallPhase::EmptySince(empty_at) => {
                if buffered > 0 {
                    self.phase = StallPhase::Healthy;
                    return StallTick::Healthy;
                }
                if now.duration_since(empty_at) >= self.grace {
                    warn!("Buffer starvation exceeded grace window, playback stalled");
                    self.phase = StallPhase::Stalled { since: now, attempts: 1 };
                    self.record.begin_episode(empty_at);
                    StallTick::StallStarted
                } else {
                    // Transient underrun inside the grace window
                    StallTick::Healthy
                }
            }
            StallPhase::Stalled { since, attempts } => {
                if buffered >= self.min_buffers {
                    info!(attempts, "Stall recovered, queue refilled");
                    self.phase = StallPhase::Healthy;
                    self.record.complete_episode(attempts, now);
                    return StallTick::Recovered(attempts);
                }
                let waited = now.duration_since(since);
                if waited >= self.grace.saturating_mul(attempts) {
                    let attempts = attempts + 1;
                    if attempts > self.max_recoveries {
                        warn!(attempts, "Stall recovery attempts exhausted");
                        return StallTick::Exhausted;
                    }
                    self.phase = StallPhase::Stalled { since, attempts };
                    StallTick::Stalling
                } else {
                    StallTick::Stalling
                }
            }
        }
    }

    /// Forget any in-progress episode (reconnect or stop tears down the
    /// pipeline; starvation bookkeeping must not leak across sessions).
    pub fn reset(&mut self) {
        self.phase = StallPhase::Healthy;
    }

    /// Whether a stall episode is currently active.
    pub fn is_stalled(&self) -> bool {
        matches!(self.phase, StallPhase::Stalled { .. })
    }

    /// Underrun ticks accumulated in the current episode; zero while
    /// healthy.
    pub fn consecutive_underruns(&self) -> u32 {
        match self.phase {
            StallPhase::Stalled { attempts, .. } => attempts,
            _ => 0,
        }
    }

    /// Underrun counters for the metrics observer.
    pub fn record(&self) -> &StallRecord {
        &self.record
    }
}

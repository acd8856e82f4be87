//! Playback state machine
//!
//! The authoritative session lifecycle. Every component change funnels
//! through `StateMachine::transition_to`, which validates the move
//! against the transition table and broadcasts a `StateChanged` event.
//! Pure logic apart from event emission: no I/O, no timers.

use crate::error::{Error, FailureReason, Result};
use crate::events::{EventBus, PlayerEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Session playback states.
///
/// `Stopped` and `Failed` are terminal; a new session is required after
/// either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum PlaybackState {
    Idle,
    Connecting,
    Buffering,
    Playing,
    Paused,
    Stalled,
    Reconnecting,
    Stopped,
    Failed(FailureReason),
}

impl PlaybackState {
    /// Whether this state ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Failed(_))
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Connecting => write!(f, "Connecting"),
            PlaybackState::Buffering => write!(f, "Buffering"),
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
            PlaybackState::Stalled => write!(f, "Stalled"),
            PlaybackState::Reconnecting => write!(f, "Reconnecting"),
            PlaybackState::Stopped => write!(f, "Stopped"),
            PlaybackState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Shared flag telling the audio sink whether to render.
///
/// Owned by the state machine and open only while the session is
/// `Playing`. The sink feeder polls it and idles without popping
/// otherwise, so pause, pre-roll buffering, and stall recovery are
/// not drained out from under the session by the output side.
#[derive(Debug, Default)]
pub struct RenderGate {
    open: AtomicBool,
}

impl RenderGate {
    /// Whether the sink may pop and render right now.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn set(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

/// Validates transitions and broadcasts state changes.
pub struct StateMachine {
    current: PlaybackState,
    bus: EventBus,
    gate: Arc<RenderGate>,
}

impl StateMachine {
    /// New machine in `Idle`, emitting on the given bus.
    pub fn new(bus: EventBus) -> Self {
        Self {
            current: PlaybackState::Idle,
            bus,
            gate: Arc::new(RenderGate::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> PlaybackState {
        self.current
    }

    /// Handle for the audio sink to observe whether rendering is live.
    pub fn render_gate(&self) -> Arc<RenderGate> {
        Arc::clone(&self.gate)
    }

    /// Whether `from -> to` appears in the transition table.
    fn allowed(from: PlaybackState, to: PlaybackState) -> bool {
        use PlaybackState::*;
        // Stop is reachable from any non-terminal state
        if to == Stopped {
            return !from.is_terminal();
        }
        match (from, to) {
            (Idle, Connecting) => true,
            (Connecting, Buffering) => true,
            (Connecting, Reconnecting) | (Connecting, Failed(_)) => true,
            (Buffering, Playing) => true,
            (Buffering, Reconnecting) | (Buffering, Failed(_)) => true,
            (Playing, Stalled) | (Playing, Paused) | (Playing, Reconnecting) => true,
            (Playing, Failed(_)) => true,
            (Paused, Playing) => true,
            (Paused, Reconnecting) | (Paused, Failed(_)) => true,
            (Stalled, Playing) | (Stalled, Reconnecting) | (Stalled, Failed(_)) => true,
            // Each retry re-enters Reconnecting so observers can count attempts
            (Reconnecting, Reconnecting) => true,
            (Reconnecting, Buffering) | (Reconnecting, Failed(_)) => true,
            _ => false,
        }
    }

    /// Attempt a transition, emitting `StateChanged` on success.
    ///
    /// A repeated `Stopped` request is an accepted no-op (idempotent
    /// stop, no duplicate event). Any other invalid request is a
    /// non-fatal usage error that leaves the state unchanged.
    pub fn transition_to(&mut self, next: PlaybackState) -> Result<()> {
        if self.current == PlaybackState::Stopped && next == PlaybackState::Stopped {
            return Ok(());
        }
        if !Self::allowed(self.current, next) {
            warn!("Rejected transition {} -> {}", self.current, next);
            return Err(Error::InvalidTransition(format!(
                "{} -> {}",
                self.current, next
            )));
        }

        let previous = self.current;
        self.current = next;
        self.gate.set(next == PlaybackState::Playing);
        debug!("Playback state: {} -> {}", previous, next);
        self.bus.emit_lossy(PlayerEvent::StateChanged {
            previous,
            current: next,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Pause request; valid only while `Playing`.
    pub fn request_pause(&mut self) -> Result<()> {
        match self.current {
            PlaybackState::Playing => self.transition_to(PlaybackState::Paused),
            PlaybackState::Paused => Ok(()),
            other => Err(Error::InvalidTransition(format!("pause from {}", other))),
        }
    }

    /// Resume request; valid only while `Paused`.
    pub fn request_resume(&mut self) -> Result<()> {
        match self.current {
            PlaybackState::Paused => self.transition_to(PlaybackState::Playing),
            PlaybackState::Playing => Ok(()),
            other => Err(Error::InvalidTransition(format!("resume from {}", other))),
        }
    }

    /// Stop request; accepted from any state, idempotent. From `Failed`
    /// the terminal state is preserved.
    pub fn request_stop(&mut self) {
        if matches!(self.current, PlaybackState::Failed(_)) {
            return;
        }
        // Cannot fail: Stopped is reachable from every non-terminal state
        let _ = self.transition_to(PlaybackState::Stopped);
    }
}

//! Event system for the airwave engine
//!
//! External collaborators (UI layers, analytics, media-session glue)
//! observe the pipeline exclusively through these events. They consume
//! but never drive state: the bus holds no ownership of subscribers.
//!
//! Communication pattern:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting
//! - **Command channels** (tokio::mpsc): request to a single handler

use crate::error::FailureReason;
use crate::playback::state::PlaybackState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by a streaming session.
///
/// Serializable so an outer surface can forward them (e.g. over SSE)
/// without re-mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Playback state changed; emitted on every accepted transition
    StateChanged {
        /// State before the transition
        previous: PlaybackState,
        /// State after the transition
        current: PlaybackState,
        /// When the transition occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A decoded PCM buffer was accepted into the queue
    BufferDelivered {
        /// Monotonic buffer sequence number
        seq: u64,
        /// Frames in the delivered buffer
        frames: usize,
        /// Queue fill level after the push
        buffered_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue starvation exceeded the grace window while playing
    StallDetected {
        /// Underruns observed in the current episode so far
        consecutive_underruns: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A stall episode recovered; emitted exactly once per episode
    StallRecovered {
        /// Underrun ticks absorbed before recovery
        attempts: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A non-terminal error absorbed by the supervisor
    SessionError {
        /// Error kind, stable across detail text
        kind: String,
        /// Human-readable description
        detail: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The session reached a terminal failure
    SessionFailed {
        reason: FailureReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Build a `SessionError` event from any displayable error.
    pub fn session_error(kind: &str, err: &impl std::fmt::Display) -> Self {
        PlayerEvent::SessionError {
            kind: kind.to_string(),
            detail: err.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// One-to-many event broadcaster.
///
/// Thin wrapper over `tokio::sync::broadcast`; cloning shares the
/// underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the subscriber count, or an error if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

//! Session metrics observer
//!
//! The metrics side of the pipeline consumes events and counters but
//! never drives state. `StallRecord` is the supervisor's per-session
//! underrun bookkeeping; `SessionMetrics` subscribes to the event bus
//! and accumulates totals for telemetry without the core holding any
//! reference to the collaborator.

use crate::events::{EventBus, PlayerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::debug;

/// Underrun accounting for the current session.
///
/// Counts consecutive underrun episodes since the last successful
/// recovery; reset on recovery.
#[derive(Debug, Default)]
pub struct StallRecord {
    /// Total stall episodes this session
    pub episodes: u64,
    /// Recovery attempts consumed by the most recent completed episode
    pub last_attempts: u32,
    /// When the current (or last) episode's starvation began
    pub first_underrun_at: Option<Instant>,
    /// When the last episode recovered
    pub recovered_at: Option<Instant>,
}

impl StallRecord {
    /// Mark the start of a stall episode.
    pub fn begin_episode(&mut self, first_underrun_at: Instant) {
        self.episodes += 1;
        self.first_underrun_at = Some(first_underrun_at);
        self.recovered_at = None;
    }

    /// Mark the current episode recovered.
    pub fn complete_episode(&mut self, attempts: u32, recovered_at: Instant) {
        self.last_attempts = attempts;
        self.recovered_at = Some(recovered_at);
    }
}

/// Counter snapshot exposed to telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub state_changes: u64,
    pub buffers_delivered: u64,
    pub stalls_detected: u64,
    pub stalls_recovered: u64,
    pub session_errors: u64,
    pub session_failures: u64,
}

#[derive(Default)]
struct Counters {
    state_changes: AtomicU64,
    buffers_delivered: AtomicU64,
    stalls_detected: AtomicU64,
    stalls_recovered: AtomicU64,
    session_errors: AtomicU64,
    session_failures: AtomicU64,
}

/// Event-bus subscriber accumulating session telemetry.
pub struct SessionMetrics {
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl SessionMetrics {
    /// Subscribe to the bus and start accumulating in the background.
    pub fn spawn(bus: &EventBus) -> Self {
        let counters = Arc::new(Counters::default());
        let mut rx = bus.subscribe();
        let task_counters = Arc::clone(&counters);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let c = &task_counters;
                        match event {
                            PlayerEvent::StateChanged { .. } => {
                                c.state_changes.fetch_add(1, Ordering::Relaxed);
                            }
                            PlayerEvent::BufferDelivered { .. } => {
                                c.buffers_delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            PlayerEvent::StallDetected { .. } => {
                                c.stalls_detected.fetch_add(1, Ordering::Relaxed);
                            }
                            PlayerEvent::StallRecovered { attempts, .. } => {
                                debug!(attempts, "Stall recovery recorded");
                                c.stalls_recovered.fetch_add(1, Ordering::Relaxed);
                            }
                            PlayerEvent::SessionError { .. } => {
                                c.session_errors.fetch_add(1, Ordering::Relaxed);
                            }
                            PlayerEvent::SessionFailed { .. } => {
                                c.session_failures.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    // Lagged receivers skip ahead; a closed bus ends the task
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { counters, task }
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            state_changes: c.state_changes.load(Ordering::Relaxed),
            buffers_delivered: c.buffers_delivered.load(Ordering::Relaxed),
            stalls_detected: c.stalls_detected.load(Ordering::Relaxed),
            stalls_recovered: c.stalls_recovered.load(Ordering::Relaxed),
            session_errors: c.session_errors.load(Ordering::Relaxed),
            session_failures: c.session_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SessionMetrics {
    fn drop(&mut self) {
        self.task.abort();
    }
}

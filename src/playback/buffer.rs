//! Bounded PCM buffer queue with backpressure
//!
//! Single-producer (decode loop, a blocking thread) / single-consumer
//! (audio sink) FIFO of decoded `PcmBuffer`s. The producer blocks when
//! the queue is full; `clear()` wakes any blocked producer with a
//! cancellation outcome so a stop or reconnect never deadlocks the
//! decode thread.
//!
//! All mutation happens under one mutex; the condvar wait is bounded so
//! a producer never sleeps past a missed wakeup.

use crate::audio::types::PcmBuffer;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Upper bound on a single condvar wait; re-checks the predicate after.
const WAIT_SLICE: Duration = Duration::from_millis(250);

/// Result of a blocking push against the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffer entered the queue
    Accepted,
    /// Queue was cleared or closed while the producer waited;
    /// the buffer was discarded
    Cancelled,
}

struct Inner {
    queue: VecDeque<PcmBuffer>,
    /// Incremented by `clear()`; a waiting producer whose epoch is stale
    /// discards its buffer instead of enqueueing stale audio
    epoch: u64,
    closed: bool,
}

/// Bounded, thread-safe FIFO of decoded PCM buffers.
pub struct BufferQueue {
    inner: Mutex<Inner>,
    space_available: Condvar,
    capacity: usize,
}

impl BufferQueue {
    /// Create a queue holding at most `capacity` buffers.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                epoch: 0,
                closed: false,
            }),
            space_available: Condvar::new(),
            capacity,
        }
    }

    /// Push with backpressure: blocks the calling thread while the queue
    /// is full. This is the pipeline's default policy.
    ///
    /// Returns `Cancelled` if the queue is cleared or closed while
    /// waiting; the buffer is dropped in that case.
    pub fn push(&self, buf: PcmBuffer) -> PushOutcome {
        let mut guard = self.inner.lock().unwrap();
        let entry_epoch = guard.epoch;
        loop {
            if guard.closed || guard.epoch != entry_epoch {
                trace!(seq = buf.seq, "Push cancelled while waiting for space");
                return PushOutcome::Cancelled;
            }
            if guard.queue.len() < self.capacity {
                guard.queue.push_back(buf);
                return PushOutcome::Accepted;
            }
            let (g, _timeout) = self
                .space_available
                .wait_timeout(guard, WAIT_SLICE)
                .unwrap();
            guard = g;
        }
    }

    /// Push with the rejecting policy: never blocks. Errors with
    /// `QueueFull` when at capacity and `Cancelled` once the queue is
    /// closed; the buffer is dropped either way.
    pub fn try_push(&self, buf: PcmBuffer) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return Err(Error::Cancelled);
        }
        if guard.queue.len() >= self.capacity {
            return Err(Error::QueueFull);
        }
        guard.queue.push_back(buf);
        Ok(())
    }

    /// Pop the oldest buffer; `None` signals empty. The consumer never
    /// blocks here — starvation policy is the supervisor's decision.
    pub fn pop(&self) -> Option<PcmBuffer> {
        let mut guard = self.inner.lock().unwrap();
        let buf = guard.queue.pop_front();
        if buf.is_some() {
            drop(guard);
            self.space_available.notify_one();
        }
        buf
    }

    /// Current number of buffered PCM blocks.
    pub fn buffered_count(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Total frames across all buffered blocks.
    pub fn buffered_frames(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.queue.iter().map(|b| b.frames()).sum()
    }

    /// Queue capacity in buffers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all buffered audio and wake any blocked producer with a
    /// cancellation signal. Used on stop, disconnect, and reconnect.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        let discarded = guard.queue.len();
        guard.queue.clear();
        guard.epoch += 1;
        drop(guard);
        self.space_available.notify_all();
        if discarded > 0 {
            trace!(discarded, "Buffer queue cleared");
        }
    }

    /// Permanently close the queue; all subsequent pushes are cancelled.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.closed = true;
        guard.queue.clear();
        drop(guard);
        self.space_available.notify_all();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn buf(seq: u64) -> PcmBuffer {
        PcmBuffer::silent(seq, 1024)
    }

    #[test]
    fn test_fifo_order() {
        let queue = BufferQueue::new(4);
        for seq in 0..3 {
            assert_eq!(queue.push(buf(seq)), PushOutcome::Accepted);
        }
        assert_eq!(queue.buffered_count(), 3);
        for seq in 0..3 {
            assert_eq!(queue.pop().unwrap().seq, seq);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_try_push_rejects_when_full() {
        let queue = BufferQueue::new(2);
        queue.try_push(buf(0)).unwrap();
        queue.try_push(buf(1)).unwrap();
        assert!(matches!(queue.try_push(buf(2)), Err(Error::QueueFull)));
        // Nothing was dropped silently
        assert_eq!(queue.buffered_count(), 2);
    }

    #[test]
    fn test_count_within_bounds() {
        let queue = BufferQueue::new(3);
        for seq in 0..10 {
            let _ = queue.try_push(buf(seq));
            assert!(queue.buffered_count() <= 3);
        }
        while queue.pop().is_some() {}
        assert_eq!(queue.buffered_count(), 0);
    }

    #[test]
    fn test_blocking_push_waits_for_pop() {
        let queue = Arc::new(BufferQueue::new(1));
        queue.push(buf(0));

        let q = Arc::clone(&queue);
        let producer = std::thread::spawn(move || {
            let started = Instant::now();
            let outcome = q.push(buf(1));
            (outcome, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.pop().unwrap().seq, 0);

        let (outcome, waited) = producer.join().unwrap();
        assert_eq!(outcome, PushOutcome::Accepted);
        assert!(waited >= Duration::from_millis(30));
        assert_eq!(queue.pop().unwrap().seq, 1);
    }

    #[test]
    fn test_clear_cancels_blocked_producer() {
        let queue = Arc::new(BufferQueue::new(1));
        queue.push(buf(0));

        let q = Arc::clone(&queue);
        let producer = std::thread::spawn(move || q.push(buf(1)));

        std::thread::sleep(Duration::from_millis(50));
        queue.clear();

        assert_eq!(producer.join().unwrap(), PushOutcome::Cancelled);
        assert_eq!(queue.buffered_count(), 0);
    }

    #[test]
    fn test_close_cancels_pushes() {
        let queue = BufferQueue::new(2);
        queue.close();
        assert_eq!(queue.push(buf(0)), PushOutcome::Cancelled);
        assert!(matches!(queue.try_push(buf(1)), Err(Error::Cancelled)));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_clear_leaves_empty() {
        let queue = BufferQueue::new(4);
        queue.push(buf(0));
        queue.push(buf(1));
        queue.clear();
        assert_eq!(queue.buffered_count(), 0);
        assert_eq!(queue.buffered_frames(), 0);
        // Still usable after clear
        assert_eq!(queue.push(buf(2)), PushOutcome::Accepted);
    }
}

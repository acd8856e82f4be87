//! Player session
//!
//! Explicit session object wiring stream source -> decoder bridge ->
//! buffer queue, constructed by the caller — no process-wide player
//! singleton. The session owns two workers:
//!
//! - the **driver** (async task): runs the connection lifecycle, feeds
//!   byte chunks to the decode loop, applies the reconnect policy;
//! - the **monitor** (async task): watches queue fill against the state
//!   machine — starts playback at the threshold, detects and recovers
//!   stalls.
//!
//! The decode loop itself runs on a blocking thread per connection and
//! pushes decoded PCM into the queue under backpressure. The audio sink
//! (external collaborator) pops from the queue on its own schedule.

use crate::config::StreamConfig;
use crate::decode::{ChunkPipe, DecodeEngine, DecodeStep, Decoder};
use crate::error::{Error, FailureReason, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::playback::buffer::{BufferQueue, PushOutcome};
use crate::playback::state::{PlaybackState, RenderGate, StateMachine};
use crate::playback::supervisor::{ReconnectPolicy, StallMonitor, StallTick};
use crate::stream::source::{StreamEvent, StreamSource};
use bytes::Bytes;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue fill poll interval for the monitor task
const MONITOR_TICK: Duration = Duration::from_millis(100);

/// Bounded chunk channel between driver and decode loop
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// How one connection ended, from the driver's perspective.
enum ConnEnd {
    /// Explicit stop requested
    Stopped,
    /// Connection lost or errored; reconnect policy applies
    Lost(Option<Error>),
}

/// How one decode loop ended.
#[derive(Debug)]
enum DecodeOutcome {
    Eof,
    Cancelled,
    Failed(Error),
}

/// One decode loop bound to one connection.
struct DecodeWorker {
    chunk_tx: mpsc::Sender<Bytes>,
    handle: JoinHandle<DecodeOutcome>,
}

/// A streaming playback session. One session = one stream lifecycle;
/// after `Stopped` or `Failed` a fresh session is required.
pub struct PlayerSession {
    id: Uuid,
    config: StreamConfig,
    bus: EventBus,
    queue: Arc<BufferQueue>,
    source: Arc<StreamSource>,
    machine: Arc<Mutex<StateMachine>>,
    engine: Arc<dyn DecodeEngine>,
    seq: Arc<AtomicU64>,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PlayerSession {
    /// Build a session from a validated configuration and decode engine.
    pub fn new(config: StreamConfig, engine: Arc<dyn DecodeEngine>) -> Result<Self> {
        config.validate()?;
        let bus = EventBus::new(256);
        let queue = Arc::new(BufferQueue::new(config.buffer_queue_size));
        let machine = Arc::new(Mutex::new(StateMachine::new(bus.clone())));
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            bus,
            queue,
            source: Arc::new(StreamSource::new()),
            machine,
            engine,
            seq: Arc::new(AtomicU64::new(0)),
            stop_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to session events. This is the only way external
    /// collaborators observe the pipeline.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    /// Shared event bus handle.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Shared buffer queue handle, for the audio sink consumer.
    pub fn queue(&self) -> Arc<BufferQueue> {
        Arc::clone(&self.queue)
    }

    /// Render gate for the audio sink; open only while `Playing`.
    pub fn render_gate(&self) -> Arc<RenderGate> {
        self.machine.lock().unwrap().render_gate()
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        self.machine.lock().unwrap().state()
    }

    /// Start the session. Valid only from `Idle`.
    pub fn start(&self) -> Result<()> {
        self.machine
            .lock()
            .unwrap()
            .transition_to(PlaybackState::Connecting)?;
        info!(session = %self.id, url = %self.config.url, "Session starting");

        let driver = tokio::spawn(run_driver(DriverCtx {
            config: self.config.clone(),
            bus: self.bus.clone(),
            queue: Arc::clone(&self.queue),
            source: Arc::clone(&self.source),
            machine: Arc::clone(&self.machine),
            engine: Arc::clone(&self.engine),
            seq: Arc::clone(&self.seq),
            stop_rx: self.stop_tx.subscribe(),
        }));

        let monitor = tokio::spawn(run_monitor(MonitorCtx {
            config: self.config.clone(),
            bus: self.bus.clone(),
            queue: Arc::clone(&self.queue),
            machine: Arc::clone(&self.machine),
            stop_rx: self.stop_tx.subscribe(),
        }));

        let mut workers = self.workers.lock().unwrap();
        workers.push(driver);
        workers.push(monitor);
        Ok(())
    }

    /// Pause playback. Valid only from `Playing`; redundant pauses are
    /// no-ops, anything else is a non-fatal usage error.
    pub fn pause(&self) -> Result<()> {
        self.machine.lock().unwrap().request_pause()
    }

    /// Resume playback. Valid only from `Paused`.
    pub fn resume(&self) -> Result<()> {
        self.machine.lock().unwrap().request_resume()
    }

    /// Stop the session: cancel ingestion and decode, clear the queue,
    /// enter `Stopped`. Idempotent — a second stop leaves the machine in
    /// `Stopped` with an empty queue, again.
    pub async fn stop(&self) {
        debug!(session = %self.id, "Stop requested");
        let _ = self.stop_tx.send(true);
        self.source.disconnect().await;
        // Wake a decode thread blocked on a full queue, then drop any
        // buffered audio so nothing stale plays after the stop
        self.queue.close();
        self.machine.lock().unwrap().request_stop();

        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!(session = %self.id, "Session stopped");
    }
}

struct DriverCtx {
    config: StreamConfig,
    bus: EventBus,
    queue: Arc<BufferQueue>,
    source: Arc<StreamSource>,
    machine: Arc<Mutex<StateMachine>>,
    engine: Arc<dyn DecodeEngine>,
    seq: Arc<AtomicU64>,
    stop_rx: watch::Receiver<bool>,
}

fn fail(machine: &Mutex<StateMachine>, bus: &EventBus, reason: FailureReason) {
    error!("Session failed: {}", reason);
    let _ = machine
        .lock()
        .unwrap()
        .transition_to(PlaybackState::Failed(reason));
    bus.emit_lossy(PlayerEvent::SessionFailed {
        reason,
        timestamp: chrono::Utc::now(),
    });
}

/// Spawn the blocking decode loop for one connection.
fn spawn_decode(ctx: &DriverCtx) -> DecodeWorker {
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let engine = Arc::clone(&ctx.engine);
    let queue = Arc::clone(&ctx.queue);
    let bus = ctx.bus.clone();
    let seq = Arc::clone(&ctx.seq);

    let handle = tokio::task::spawn_blocking(move || {
        let pipe = ChunkPipe::new(chunk_rx);
        let mut decoder: Box<dyn Decoder> = match engine.open(pipe, seq) {
            Ok(decoder) => decoder,
            Err(e) => return DecodeOutcome::Failed(e),
        };

        loop {
            match decoder.decode_next() {
                Ok(DecodeStep::Frames(buf)) => {
                    let seq = buf.seq;
                    let frames = buf.frames();
                    match queue.push(buf) {
                        PushOutcome::Accepted => {
                            bus.emit_lossy(PlayerEvent::BufferDelivered {
                                seq,
                                frames,
                                buffered_count: queue.buffered_count(),
                                timestamp: chrono::Utc::now(),
                            });
                        }
                        // Queue cleared or closed under us: this decode
                        // session is over
                        PushOutcome::Cancelled => return DecodeOutcome::Cancelled,
                    }
                }
                Ok(DecodeStep::Eof) => return DecodeOutcome::Eof,
                Err(e) => return DecodeOutcome::Failed(e),
            }
        }
        // decoder drops here on every path, releasing engine resources
    });

    DecodeWorker { chunk_tx, handle }
}

/// Tear down a connection's decode loop and collect its outcome.
async fn teardown_decode(worker: Option<DecodeWorker>, queue: &BufferQueue) -> Option<DecodeOutcome> {
    let worker = worker?;
    // Close the byte feed, then cancel a push blocked on a full queue;
    // the loop exits on whichever it observes first
    drop(worker.chunk_tx);
    queue.clear();
    match worker.handle.await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Decode worker panicked: {}", e);
            None
        }
    }
}

async fn run_driver(mut ctx: DriverCtx) {
    let mut reconnect = ReconnectPolicy::new(
        ctx.config.max_reconnect_attempts,
        ctx.config.reconnect_delay(),
    );

    'connection: loop {
        if *ctx.stop_rx.borrow() {
            break;
        }

        let mut events = ctx.source.connect(&ctx.config).await;
        let mut decode: Option<DecodeWorker> = None;
        let mut connected = false;

        let end = loop {
            // Connection establishment is bounded; once connected the
            // stream may legitimately idle between chunks
            let next = if connected {
                tokio::select! {
                    _ = ctx.stop_rx.changed() => break ConnEnd::Stopped,
                    next = events.recv() => next,
                }
            } else {
                tokio::select! {
                    _ = ctx.stop_rx.changed() => break ConnEnd::Stopped,
                    next = tokio::time::timeout(ctx.config.connection_timeout(), events.recv()) => {
                        match next {
                            Ok(next) => next,
                            Err(_) => break ConnEnd::Lost(Some(Error::Timeout)),
                        }
                    }
                }
            };

            match next {
                Some(StreamEvent::Connected) => {
                    connected = true;
                    // Reaching Buffering is what resets the attempt counter
                    if ctx
                        .machine
                        .lock()
                        .unwrap()
                        .transition_to(PlaybackState::Buffering)
                        .is_err()
                    {
                        break ConnEnd::Stopped;
                    }
                    reconnect.reset();
                    decode = Some(spawn_decode(&ctx));
                }
                Some(StreamEvent::Data(bytes)) => {
                    if let Some(worker) = &decode {
                        let sent = tokio::select! {
                            _ = ctx.stop_rx.changed() => break ConnEnd::Stopped,
                            sent = worker.chunk_tx.send(bytes) => sent,
                        };
                        if sent.is_err() {
                            // Decode loop ended on its own; outcome decides next step
                            break ConnEnd::Lost(None);
                        }
                    }
                }
                Some(StreamEvent::Disconnected) => break ConnEnd::Lost(None),
                Some(StreamEvent::Error(e)) => break ConnEnd::Lost(Some(e)),
                None => break ConnEnd::Lost(None),
            }
        };

        // Discard in-flight partial state: frames from two decode
        // sessions never interleave across a reconnect
        let outcome = teardown_decode(decode, &ctx.queue).await;

        match end {
            ConnEnd::Stopped => break,
            ConnEnd::Lost(err) => {
                if let Some(e) = &err {
                    ctx.bus
                        .emit_lossy(PlayerEvent::session_error("connection", e));
                }
                if let Some(DecodeOutcome::Failed(e)) = &outcome {
                    ctx.bus.emit_lossy(PlayerEvent::session_error("decode", e));
                    if matches!(e, Error::ResourceExhausted(_)) {
                        fail(&ctx.machine, &ctx.bus, FailureReason::DecoderExhausted);
                        break 'connection;
                    }
                    // Malformed input on a live connection is treated
                    // like a connection loss
                }

                if ctx.machine.lock().unwrap().state().is_terminal() {
                    break;
                }

                if !ctx.config.auto_reconnect {
                    fail(&ctx.machine, &ctx.bus, FailureReason::ConnectFailed);
                    break;
                }

                match reconnect.begin_attempt() {
                    None => {
                        fail(&ctx.machine, &ctx.bus, FailureReason::ReconnectExhausted);
                        break;
                    }
                    Some(attempt) => {
                        if ctx
                            .machine
                            .lock()
                            .unwrap()
                            .transition_to(PlaybackState::Reconnecting)
                            .is_err()
                        {
                            break;
                        }
                        debug!(attempt, "Waiting before reconnect");
                        tokio::select! {
                            _ = ctx.stop_rx.changed() => break,
                            _ = tokio::time::sleep(reconnect.delay()) => {}
                        }
                    }
                }
            }
        }
    }

    debug!("Driver task finished");
}

struct MonitorCtx {
    config: StreamConfig,
    bus: EventBus,
    queue: Arc<BufferQueue>,
    machine: Arc<Mutex<StateMachine>>,
    stop_rx: watch::Receiver<bool>,
}

async fn run_monitor(mut ctx: MonitorCtx) {
    let mut stall = StallMonitor::new(
        ctx.config.stall_grace(),
        ctx.config.min_buffers_before_playback,
        ctx.config.max_stall_recoveries,
    );
    let mut ticker = tokio::time::interval(MONITOR_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ctx.stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let state = ctx.machine.lock().unwrap().state();
        if state.is_terminal() {
            break;
        }

        let buffered = ctx.queue.buffered_count();
        match state {
            PlaybackState::Buffering => {
                stall.reset();
                if buffered >= ctx.config.min_buffers_before_playback {
                    info!(buffered, "Minimum fill reached, starting playback");
                    let _ = ctx
                        .machine
                        .lock()
                        .unwrap()
                        .transition_to(PlaybackState::Playing);
                }
            }
            PlaybackState::Playing | PlaybackState::Stalled => {
                match stall.observe(buffered, Instant::now()) {
                    StallTick::Healthy | StallTick::Stalling => {}
                    StallTick::StallStarted => {
                        let _ = ctx
                            .machine
                            .lock()
                            .unwrap()
                            .transition_to(PlaybackState::Stalled);
                        ctx.bus.emit_lossy(PlayerEvent::StallDetected {
                            consecutive_underruns: stall.consecutive_underruns(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    StallTick::Recovered(attempts) => {
                        let _ = ctx
                            .machine
                            .lock()
                            .unwrap()
                            .transition_to(PlaybackState::Playing);
                        ctx.bus.emit_lossy(PlayerEvent::StallRecovered {
                            attempts,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    StallTick::Exhausted => {
                        fail(&ctx.machine, &ctx.bus, FailureReason::StallExhausted);
                        break;
                    }
                }
            }
            // Starvation bookkeeping only applies while playback is due
            _ => stall.reset(),
        }
    }

    debug!("Monitor task finished");
}

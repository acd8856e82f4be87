//! HTTP stream source
//!
//! Opens a single GET against the stream URL and forwards the body as a
//! sequence of `StreamEvent`s over a bounded channel: `Connected`, then
//! fixed 4096-byte `Data` chunks (one shorter final chunk at end of
//! body), then `Disconnected`. Errors terminate the sequence without
//! internal retry — the retry policy lives in the session supervisor.
//!
//! Cancellation is an owned, swappable token: a new `connect` atomically
//! cancels the previous connection, so a source holds at most one live
//! transfer.

use crate::config::StreamConfig;
use crate::error::Error;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONNECTION};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Fixed chunk size forwarded to the decoder
pub const CHUNK_SIZE: usize = 4096;

/// Client identifier sent with every stream request
pub const CLIENT_USER_AGENT: &str = concat!("airwave/", env!("CARGO_PKG_VERSION"));

/// Bounded event channel depth; full channel backpressures the network read
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle and data events emitted by a stream connection.
#[derive(Debug)]
pub enum StreamEvent {
    /// HTTP 200 received, body transfer begins
    Connected,
    /// One chunk of raw compressed bytes (4096 bytes except the final one)
    Data(Bytes),
    /// Body ended or the transfer was explicitly disconnected
    Disconnected,
    /// Connection-level failure; terminates the sequence
    Error(Error),
}

struct ConnectionHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    event_tx: mpsc::Sender<StreamEvent>,
}

/// HTTP ingestion front end. At most one active connection per instance.
pub struct StreamSource {
    active: Mutex<Option<ConnectionHandle>>,
}

impl StreamSource {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Open a connection and return the event sequence.
    ///
    /// If a connection is already active it is silently cancelled first
    /// (no `Disconnected` on the old sequence).
    pub async fn connect(&self, config: &StreamConfig) -> mpsc::Receiver<StreamEvent> {
        self.cancel_active().await;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(config.clone(), event_tx.clone(), cancel_rx));

        *self.active.lock().await = Some(ConnectionHandle {
            cancel_tx,
            task,
            event_tx,
        });
        event_rx
    }

    /// Cancel the in-flight transfer immediately.
    ///
    /// Any unflushed partial chunk is discarded and a single
    /// `Disconnected` is issued on the event sequence.
    pub async fn disconnect(&self) {
        if let Some(event_tx) = self.cancel_active().await {
            debug!("Stream source disconnected");
            let _ = event_tx.send(StreamEvent::Disconnected).await;
        }
    }

    /// Tear down the active connection, returning its event sender so the
    /// caller can decide whether to announce the disconnect.
    async fn cancel_active(&self) -> Option<mpsc::Sender<StreamEvent>> {
        let handle = self.active.lock().await.take();
        let handle = handle?;
        // Signal first so a task parked on a send observes cancellation,
        // then abort to cut any pending network read.
        let _ = handle.cancel_tx.send(true);
        handle.task.abort();
        let _ = handle.task.await;
        Some(handle.event_tx)
    }
}

impl Default for StreamSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Split all complete chunks out of the accumulation buffer.
fn drain_full_chunks(pending: &mut BytesMut) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    while pending.len() >= CHUNK_SIZE {
        chunks.push(pending.split_to(CHUNK_SIZE).freeze());
    }
    chunks
}

fn classify_request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else if e.is_builder() {
        Error::InvalidUrl(e.to_string())
    } else if e.is_connect() {
        Error::Connect(e.to_string())
    } else {
        Error::Transfer(e.to_string())
    }
}

async fn run_connection(
    config: StreamConfig,
    tx: mpsc::Sender<StreamEvent>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let client = match reqwest::Client::builder()
        .connect_timeout(config.connection_timeout())
        .user_agent(CLIENT_USER_AGENT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            let _ = tx.send(StreamEvent::Error(Error::Connect(e.to_string()))).await;
            return;
        }
    };

    debug!(url = %config.url, "Connecting to stream");
    let request = client
        .get(&config.url)
        .header(ACCEPT, "audio/mpeg, audio/*")
        .header(CONNECTION, "keep-alive");

    let response = tokio::select! {
        _ = cancel_rx.changed() => return,
        result = request.send() => result,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            warn!("Stream connection failed: {}", e);
            let _ = tx
                .send(StreamEvent::Error(classify_request_error(e)))
                .await;
            return;
        }
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        warn!(status = status.as_u16(), "Stream rejected request");
        let _ = tx
            .send(StreamEvent::Error(Error::HttpStatus(status.as_u16())))
            .await;
        return;
    }

    info!(url = %config.url, "Stream connected");
    if tx.send(StreamEvent::Connected).await.is_err() {
        return;
    }

    let mut body = response.bytes_stream();
    let mut pending = BytesMut::with_capacity(CHUNK_SIZE * 2);

    loop {
        let next = tokio::select! {
            _ = cancel_rx.changed() => return,
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                trace!(len = bytes.len(), "Received network bytes");
                pending.extend_from_slice(&bytes);
                for chunk in drain_full_chunks(&mut pending) {
                    let sent = tokio::select! {
                        _ = cancel_rx.changed() => return,
                        sent = tx.send(StreamEvent::Data(chunk)) => sent,
                    };
                    if sent.is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Stream transfer error: {}", e);
                let err = if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Transfer(e.to_string())
                };
                let _ = tx.send(StreamEvent::Error(err)).await;
                return;
            }
            None => {
                // Clean end of body: flush the short final chunk
                if !pending.is_empty() {
                    let tail = pending.split().freeze();
                    debug!(len = tail.len(), "Flushing final partial chunk");
                    let sent = tokio::select! {
                        _ = cancel_rx.changed() => return,
                        sent = tx.send(StreamEvent::Data(tail)) => sent,
                    };
                    if sent.is_err() {
                        return;
                    }
                }
                info!("Stream ended");
                let _ = tx.send(StreamEvent::Disconnected).await;
                return;
            }
        }
    }
}

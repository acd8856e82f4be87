//! Shared test helpers: in-process HTTP stream servers and a stub
//! decode engine that turns byte chunks directly into PCM buffers.

#![allow(dead_code)]

use airwave::audio::PcmBuffer;
use airwave::decode::{ChunkPipe, DecodeEngine, DecodeStep, Decoder};
use airwave::error::{Error, Result};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serve exactly one HTTP response with the given status line and body,
/// then close the connection. Returns the bound address.
pub async fn serve_once(status: &'static str, body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut head = [0u8; 1024];
            let _ = socket.read(&mut head).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        }
    });

    addr
}

/// A streaming server under test control: the response never declares a
/// length (EOF-delimited, like a live radio mount) and body bytes are
/// released only when the test sends them. Dropping the handle closes
/// the connection.
pub struct DribbleServer {
    pub addr: SocketAddr,
    body_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl DribbleServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (body_tx, mut body_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut head = [0u8; 1024];
                let _ = socket.read(&mut head).await;
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nConnection: close\r\n\r\n";
                if socket.write_all(response.as_bytes()).await.is_err() {
                    return;
                }
                while let Some(bytes) = body_rx.recv().await {
                    if socket.write_all(&bytes).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                }
                let _ = socket.shutdown().await;
            }
        });

        Self { addr, body_tx }
    }

    /// Release `n` full 4096-byte chunks to the client.
    pub fn send_chunks(&self, n: usize) {
        for _ in 0..n {
            self.send_bytes(vec![0u8; 4096]);
        }
    }

    /// Release an arbitrary run of body bytes to the client.
    pub fn send_bytes(&self, bytes: Vec<u8>) {
        self.body_tx.send(bytes).expect("server gone");
    }

    pub fn url(&self) -> String {
        format!("http://{}/stream", self.addr)
    }
}

/// Decode engine stub: every 4096 input bytes become one silent
/// 1024-frame buffer. Sequence numbering uses the shared counter, as
/// the real engine does.
pub struct StubEngine;

impl DecodeEngine for StubEngine {
    fn open(&self, chunks: ChunkPipe, seq: Arc<AtomicU64>) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(StubDecoder { pipe: chunks, seq }))
    }
}

struct StubDecoder {
    pipe: ChunkPipe,
    seq: Arc<AtomicU64>,
}

impl Decoder for StubDecoder {
    fn decode_next(&mut self) -> Result<DecodeStep> {
        let mut scratch = [0u8; 4096];
        let mut filled = 0;
        while filled < scratch.len() {
            let n = self
                .pipe
                .read(&mut scratch[filled..])
                .map_err(|e| Error::MalformedStream(e.to_string()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(DecodeStep::Eof);
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(DecodeStep::Frames(PcmBuffer::silent(seq, 1024)))
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn channels(&self) -> u16 {
        2
    }
}

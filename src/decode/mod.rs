//! Decoder bridge
//!
//! Wraps a frame-based decode engine behind a uniform interface that
//! turns raw compressed byte chunks into fixed-format PCM: 48 kHz,
//! stereo, planar f32 — an invariant of the engine, not negotiable by
//! callers.
//!
//! `Decoder` is a scoped resource: engine state is released when the
//! value drops, on every exit path including early errors. The engine
//! consumes bytes through a `ChunkPipe`, a blocking adapter fed from the
//! async ingestion side with bounded backpressure.

mod resampler;
mod symphonia_decoder;

pub use resampler::StreamResampler;
pub use symphonia_decoder::SymphoniaEngine;

use crate::audio::types::PcmBuffer;
use crate::error::Result;
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use symphonia::core::io::MediaSource;
use tokio::sync::mpsc;

/// Result of one decode step.
#[derive(Debug)]
pub enum DecodeStep {
    /// One or more decoded frames, ownership transferred to the caller
    Frames(PcmBuffer),
    /// Clean end of stream
    Eof,
}

/// An open decode session over one connection's byte stream.
///
/// Dropping the decoder releases the underlying engine resources.
pub trait Decoder: Send {
    /// Decode the next block of frames.
    ///
    /// Errors distinguish malformed input (`Error::MalformedStream`,
    /// treated like a connection loss) from engine resource exhaustion
    /// (`Error::ResourceExhausted`, fatal for the session).
    fn decode_next(&mut self) -> Result<DecodeStep>;

    /// Output sample rate; always 48,000.
    fn sample_rate(&self) -> u32;

    /// Output channel count; always 2.
    fn channels(&self) -> u16;

    /// Output layout; always planar.
    fn is_interleaved(&self) -> bool {
        false
    }
}

/// Factory for decode sessions. One decoder per connection; sequence
/// numbering continues across connections via the shared counter.
pub trait DecodeEngine: Send + Sync {
    fn open(&self, chunks: ChunkPipe, seq: Arc<AtomicU64>) -> Result<Box<dyn Decoder>>;
}

/// Blocking byte source bridging the async ingestion task to a
/// synchronous decode loop.
///
/// Reads block until a chunk arrives; a closed channel reads as clean
/// EOF, which is how cancellation and disconnect reach the decoder.
pub struct ChunkPipe {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
    position: u64,
}

impl ChunkPipe {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            position: 0,
        }
    }
}

impl Read for ChunkPipe {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(bytes) => self.current = bytes,
                // Sender dropped: end of stream
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current = self.current.slice(n..);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ChunkPipe {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        // A live stream cannot seek; report the current position only
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "live stream is not seekable",
            )),
        }
    }
}

impl MediaSource for ChunkPipe {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_pipe_reads_across_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Bytes::from_static(b"abcd")).unwrap();
        tx.try_send(Bytes::from_static(b"ef")).unwrap();
        drop(tx);

        let mut pipe = ChunkPipe::new(rx);
        let mut out = [0u8; 3];
        assert_eq!(pipe.read(&mut out).unwrap(), 3);
        assert_eq!(&out, b"abc");
        assert_eq!(pipe.read(&mut out).unwrap(), 1);
        assert_eq!(&out[..1], b"d");
        assert_eq!(pipe.read(&mut out).unwrap(), 2);
        assert_eq!(&out[..2], b"ef");
        // Closed channel reads as EOF
        assert_eq!(pipe.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_chunk_pipe_rejects_seek() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(tx);
        let mut pipe = ChunkPipe::new(rx);
        assert!(!pipe.is_seekable());
        assert!(pipe.byte_len().is_none());
        assert!(pipe.seek(SeekFrom::Start(0)).is_err());
        assert_eq!(pipe.seek(SeekFrom::Current(0)).unwrap(), 0);
    }
}

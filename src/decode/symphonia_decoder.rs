//! Symphonia-backed decode engine
//!
//! Probes the compressed byte stream (MP3, AAC, Vorbis, FLAC), decodes
//! packet by packet, and normalizes everything to the bridge's fixed
//! output format: 48 kHz, stereo, planar f32. Mono sources are
//! duplicated to both channels; extra channels beyond stereo are
//! dropped.

use super::{ChunkPipe, DecodeStep, Decoder, StreamResampler};
use crate::audio::types::PcmBuffer;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace, warn};

/// Decode engine factory over symphonia's probe and codec registry.
#[derive(Default)]
pub struct SymphoniaEngine;

impl SymphoniaEngine {
    pub fn new() -> Self {
        Self
    }
}

impl super::DecodeEngine for SymphoniaEngine {
    fn open(&self, chunks: ChunkPipe, seq: Arc<AtomicU64>) -> Result<Box<dyn Decoder>> {
        let mss = MediaSourceStream::new(Box::new(chunks), Default::default());

        // Radio streams are usually MP3; the probe sniffs the real format
        let mut hint = Hint::new();
        hint.mime_type("audio/mpeg");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(map_symphonia_error)?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::MalformedStream("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let source_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::MalformedStream("Sample rate not declared".to_string()))?;

        debug!(
            source_rate,
            channels = ?codec_params.channels,
            "Opened decode session"
        );

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::MalformedStream(format!("Failed to create decoder: {}", e)))?;

        Ok(Box::new(SymphoniaDecoder {
            format,
            decoder,
            track_id,
            resampler: StreamResampler::new(source_rate)?,
            seq,
            sample_buf: None,
        }))
    }
}

/// One decode session. Engine resources (format reader, codec state)
/// are owned here and released on drop.
struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    resampler: StreamResampler,
    seq: Arc<AtomicU64>,
    sample_buf: Option<(SampleBuffer<f32>, SignalSpec, u64)>,
}

impl Decoder for SymphoniaDecoder {
    fn decode_next(&mut self) -> Result<DecodeStep> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Decode session reached end of stream");
                    return Ok(DecodeStep::Eof);
                }
                Err(e) => return Err(map_symphonia_error(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Packet decode failed: {}", e);
                    return Err(map_symphonia_error(e));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;

            // (Re)allocate the conversion buffer when the stream geometry changes
            let needs_new = match &self.sample_buf {
                Some((_, cached_spec, cached_cap)) => {
                    *cached_spec != spec || *cached_cap < capacity
                }
                None => true,
            };
            if needs_new {
                self.sample_buf = None;
            }
            let (sample_buf, _, _) = self
                .sample_buf
                .get_or_insert_with(|| (SampleBuffer::<f32>::new(capacity, spec), spec, capacity));
            sample_buf.copy_interleaved_ref(decoded);

            let channels = spec.channels.count();
            let (left, right) = planarize(sample_buf.samples(), channels);
            let (left, right) = self.resampler.process(left, right)?;

            if left.is_empty() {
                // Resampler still accumulating a full block
                continue;
            }

            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            trace!(seq, frames = left.len(), "Decoded PCM block");
            return Ok(DecodeStep::Frames(PcmBuffer::new(seq, left, right)));
        }
    }

    fn sample_rate(&self) -> u32 {
        crate::audio::types::OUTPUT_SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        crate::audio::types::OUTPUT_CHANNELS
    }
}

impl Drop for SymphoniaDecoder {
    fn drop(&mut self) {
        // FormatReader and codec state release with the value; the reset
        // makes the release explicit for codecs holding native buffers
        self.decoder.reset();
        trace!("Decode session closed");
    }
}

/// Split interleaved samples into stereo planar channels.
///
/// Mono duplicates into both channels; channels beyond the first two
/// are dropped.
fn planarize(samples: &[f32], channels: usize) -> (Vec<f32>, Vec<f32>) {
    match channels {
        0 => (Vec::new(), Vec::new()),
        1 => (samples.to_vec(), samples.to_vec()),
        n => {
            let frames = samples.len() / n;
            let mut left = Vec::with_capacity(frames);
            let mut right = Vec::with_capacity(frames);
            for frame in samples.chunks_exact(n) {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            (left, right)
        }
    }
}

/// Map symphonia's error taxonomy onto the bridge contract: malformed
/// input is retryable (treated like a connection loss), resource limits
/// are fatal.
fn map_symphonia_error(e: SymphoniaError) -> Error {
    match e {
        SymphoniaError::DecodeError(m) => Error::MalformedStream(m.to_string()),
        SymphoniaError::Unsupported(m) => Error::MalformedStream(m.to_string()),
        SymphoniaError::ResetRequired => {
            Error::MalformedStream("decoder reset required".to_string())
        }
        SymphoniaError::LimitError(m) => Error::ResourceExhausted(m.to_string()),
        SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::OutOfMemory => {
            Error::ResourceExhausted(e.to_string())
        }
        SymphoniaError::IoError(e) => Error::MalformedStream(e.to_string()),
        SymphoniaError::SeekError(_) => {
            Error::MalformedStream("seek on unseekable stream".to_string())
        }
    }
}

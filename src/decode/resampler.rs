//! Streaming resampler pinning decoder output at 48 kHz
//!
//! Sources arrive at whatever rate the codec declares; the bridge
//! contract fixes output at 48 kHz. rubato's FastFixedIn needs
//! fixed-size input blocks, so this wrapper accumulates planar input
//! and processes it in whole blocks, carrying the remainder to the next
//! call. At equal rates it is a passthrough.

use crate::audio::types::OUTPUT_SAMPLE_RATE;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames consumed per resample block
const BLOCK_FRAMES: usize = 1024;

/// Stateful stereo resampler to the fixed 48 kHz output rate.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending_left: Vec<f32>,
    pending_right: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler for the given source rate.
    pub fn new(input_rate: u32) -> Result<Self> {
        let inner = if input_rate == OUTPUT_SAMPLE_RATE {
            debug!("Source already at {} Hz, resampler in passthrough", input_rate);
            None
        } else {
            debug!(
                "Resampling {} Hz -> {} Hz",
                input_rate, OUTPUT_SAMPLE_RATE
            );
            Some(
                FastFixedIn::<f32>::new(
                    OUTPUT_SAMPLE_RATE as f64 / input_rate as f64,
                    1.0,
                    PolynomialDegree::Septic,
                    BLOCK_FRAMES,
                    2,
                )
                .map_err(|e| Error::MalformedStream(format!("Resampler init failed: {}", e)))?,
            )
        };

        Ok(Self {
            inner,
            pending_left: Vec::new(),
            pending_right: Vec::new(),
        })
    }

    /// Feed planar input, returning whatever output is ready.
    ///
    /// May return empty vectors while the resampler accumulates a full
    /// input block; the caller keeps feeding.
    pub fn process(&mut self, left: Vec<f32>, right: Vec<f32>) -> Result<(Vec<f32>, Vec<f32>)> {
        let inner = match self.inner.as_mut() {
            None => return Ok((left, right)),
            Some(inner) => inner,
        };

        self.pending_left.extend_from_slice(&left);
        self.pending_right.extend_from_slice(&right);

        let mut out_left = Vec::new();
        let mut out_right = Vec::new();

        while self.pending_left.len() >= BLOCK_FRAMES {
            let block_left: Vec<f32> = self.pending_left.drain(..BLOCK_FRAMES).collect();
            let block_right: Vec<f32> = self.pending_right.drain(..BLOCK_FRAMES).collect();

            let output = inner
                .process(&[block_left, block_right], None)
                .map_err(|e| Error::MalformedStream(format!("Resampling failed: {}", e)))?;

            out_left.extend_from_slice(&output[0]);
            out_right.extend_from_slice(&output[1]);
        }

        Ok((out_left, out_right))
    }

    /// Frames buffered awaiting a full input block.
    pub fn pending_frames(&self) -> usize {
        self.pending_left.len()
    }
}

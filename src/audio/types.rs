//! Core audio data types
//!
//! The pipeline carries decoded audio as `PcmBuffer` blocks in the decode
//! engine's fixed output format: 48 kHz, two channels, planar f32. A
//! buffer is owned by exactly one stage at a time; ownership transfers
//! decoder -> queue -> sink, never shared mutably.

/// Fixed output sample rate of the decode engine
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Fixed output channel count of the decode engine
pub const OUTPUT_CHANNELS: u16 = 2;

/// A block of decoded PCM audio in planar layout.
///
/// **Format:**
/// - Samples are f32 in [-1.0, 1.0]
/// - Planar: `left` and `right` hold one channel each, equal length
/// - Sample rate always 48,000 Hz, always stereo
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    /// Monotonic sequence number assigned at decode time
    pub seq: u64,

    /// Sample rate (always 48000)
    pub sample_rate: u32,

    /// Channel count (always 2)
    pub channels: u16,

    /// Left channel samples
    pub left: Vec<f32>,

    /// Right channel samples (same length as `left`)
    pub right: Vec<f32>,
}

impl PcmBuffer {
    /// Create a buffer from planar channel data.
    ///
    /// # Panics
    /// Panics if channel lengths differ; planar channels must stay in step.
    pub fn new(seq: u64, left: Vec<f32>, right: Vec<f32>) -> Self {
        assert_eq!(left.len(), right.len(), "Planar channels must be equal length");
        Self {
            seq,
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: OUTPUT_CHANNELS,
            left,
            right,
        }
    }

    /// Create a silent buffer of the given frame count.
    pub fn silent(seq: u64, frames: usize) -> Self {
        Self::new(seq, vec![0.0; frames], vec![0.0; frames])
    }

    /// Number of frames in this buffer (samples per channel).
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Duration in milliseconds at the fixed output rate.
    pub fn duration_ms(&self) -> u64 {
        (self.frames() as u64 * 1000) / self.sample_rate as u64
    }

    /// Single frame at the given index, as (left, right).
    pub fn frame(&self, index: usize) -> Option<(f32, f32)> {
        if index < self.frames() {
            Some((self.left[index], self.right[index]))
        } else {
            None
        }
    }

    /// Interleave to [L, R, L, R, ...] for interleaved-format sinks.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * 2);
        for i in 0..self.frames() {
            out.push(self.left[i]);
            out.push(self.right[i]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_buffer_creation() {
        let buffer = PcmBuffer::new(7, vec![0.1, 0.2], vec![-0.1, -0.2]);
        assert_eq!(buffer.seq, 7);
        assert_eq!(buffer.sample_rate, 48_000);
        assert_eq!(buffer.channels, 2);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    #[should_panic(expected = "equal length")]
    fn test_unequal_channels_panics() {
        PcmBuffer::new(0, vec![0.1, 0.2], vec![0.3]);
    }

    #[test]
    fn test_duration() {
        // 48,000 frames = 1 second at 48 kHz
        let buffer = PcmBuffer::silent(0, 48_000);
        assert_eq!(buffer.duration_ms(), 1000);
    }

    #[test]
    fn test_frame_access() {
        let buffer = PcmBuffer::new(0, vec![0.1, 0.3], vec![0.2, 0.4]);
        assert_eq!(buffer.frame(0), Some((0.1, 0.2)));
        assert_eq!(buffer.frame(1), Some((0.3, 0.4)));
        assert_eq!(buffer.frame(2), None);
    }

    #[test]
    fn test_interleaved() {
        let buffer = PcmBuffer::new(0, vec![0.1, 0.3], vec![0.2, 0.4]);
        assert_eq!(buffer.interleaved(), vec![0.1, 0.2, 0.3, 0.4]);
    }
}

//! Audio types and device output

pub mod output;
pub mod types;

pub use output::{AudioSink, CpalSink, NullSink};
pub use types::{PcmBuffer, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

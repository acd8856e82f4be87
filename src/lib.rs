//! # Airwave
//!
//! Streaming audio playback engine for live radio over HTTP.
//!
//! **Purpose:** Connect to a radio stream URL, chunk the byte stream,
//! decode to 48 kHz stereo PCM, buffer under backpressure, and render
//! to an audio device — recovering from connection loss and buffer
//! stalls along the way.
//!
//! **Architecture:** Single-pipeline design using reqwest + symphonia +
//! rubato + cpal. A [`playback::PlayerSession`] owns the pipeline;
//! observers subscribe to its [`events::EventBus`].

pub mod audio;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod metrics;
pub mod playback;
pub mod stream;

pub use config::StreamConfig;
pub use error::{Error, FailureReason, Result};
pub use events::{EventBus, PlayerEvent};
pub use playback::{PlaybackState, PlayerSession};

//! Error types for the airwave streaming engine
//!
//! Defines the crate-wide error type using thiserror, plus the terminal
//! failure reasons surfaced through `PlaybackState::Failed`.
//!
//! Transient conditions (connection drops, single-stream decode faults,
//! buffer underruns) are absorbed by the reconnect/stall supervisor and
//! never reach the caller as errors; the caller-visible contract is state
//! transitions plus a final `FailureReason`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the airwave engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server responded with a non-200 status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Connection establishment exceeded the configured timeout
    #[error("Connection timed out")]
    Timeout,

    /// Operation observed an explicit cancellation
    #[error("Cancelled")]
    Cancelled,

    /// Transfer failed mid-stream
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Compressed input could not be decoded
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    /// Decoder ran out of resources; not safely retryable
    #[error("Decoder resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Rejected push against a full buffer queue
    #[error("Buffer queue full")]
    QueueFull,

    /// Invalid state transition request (non-fatal usage error)
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a connection-level condition that feeds the
    /// reconnect supervisor rather than terminating the session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect(_)
                | Error::HttpStatus(_)
                | Error::Timeout
                | Error::Transfer(_)
                | Error::MalformedStream(_)
        )
    }
}

/// Terminal failure reason carried by `PlaybackState::Failed`.
///
/// These are the only error conditions a session surfaces to callers;
/// everything retryable stays inside the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Initial connection failed and auto-reconnect is disabled
    ConnectFailed,
    /// Reconnect attempts exceeded the configured maximum
    ReconnectExhausted,
    /// Consecutive stall episodes failed to recover
    StallExhausted,
    /// Decoder resource exhaustion (cannot be retried safely)
    DecoderExhausted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ConnectFailed => write!(f, "connection failed"),
            FailureReason::ReconnectExhausted => write!(f, "reconnect attempts exhausted"),
            FailureReason::StallExhausted => write!(f, "stall recovery exhausted"),
            FailureReason::DecoderExhausted => write!(f, "decoder resources exhausted"),
        }
    }
}

/// Convenience Result type using the airwave Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Connect("refused".into()).is_retryable());
        assert!(Error::HttpStatus(503).is_retryable());
        assert!(Error::MalformedStream("bad frame".into()).is_retryable());
        assert!(!Error::ResourceExhausted("oom".into()).is_retryable());
        assert!(!Error::InvalidTransition("resume from Stopped".into()).is_retryable());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::ReconnectExhausted.to_string(),
            "reconnect attempts exhausted"
        );
    }
}

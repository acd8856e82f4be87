//! Reconnect supervision integration tests
//!
//! Drives a full session against unreachable endpoints and checks the
//! bounded retry discipline: each retry re-enters Reconnecting, and
//! exhausting the attempt budget lands in Failed(ReconnectExhausted).

mod helpers;

use airwave::config::StreamConfig;
use airwave::error::FailureReason;
use airwave::events::PlayerEvent;
use airwave::playback::{PlaybackState, PlayerSession};
use helpers::StubEngine;
use std::sync::Arc;
use std::time::Duration;

fn unreachable_config(max_attempts: u32) -> StreamConfig {
    // Bind then drop to get a port nothing is listening on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = StreamConfig::new(format!("http://{}/stream", addr));
    config.max_reconnect_attempts = max_attempts;
    config.reconnect_delay_secs = 0.05;
    config.connection_timeout_secs = 2.0;
    config
}

/// Collect state-change events until a terminal state appears.
async fn run_to_terminal(session: &PlayerSession) -> Vec<PlaybackState> {
    let mut rx = session.subscribe();
    session.start().unwrap();

    let mut states = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("session did not reach a terminal state")
            .expect("event bus closed");
        if let PlayerEvent::StateChanged { current, .. } = event {
            states.push(current);
            if current.is_terminal() {
                return states;
            }
        }
    }
}

#[tokio::test]
async fn test_exhausted_attempts_fail_the_session() {
    let session =
        PlayerSession::new(unreachable_config(2), Arc::new(StubEngine)).unwrap();
    let states = run_to_terminal(&session).await;

    // Initial failure plus two retries, then terminal failure
    assert_eq!(
        states,
        vec![
            PlaybackState::Connecting,
            PlaybackState::Reconnecting,
            PlaybackState::Reconnecting,
            PlaybackState::Failed(FailureReason::ReconnectExhausted),
        ]
    );
    assert_eq!(
        session.state(),
        PlaybackState::Failed(FailureReason::ReconnectExhausted)
    );
    session.stop().await;
    // Failed is preserved across a stop request
    assert_eq!(
        session.state(),
        PlaybackState::Failed(FailureReason::ReconnectExhausted)
    );
}

#[tokio::test]
async fn test_reconnect_disabled_fails_immediately() {
    let mut config = unreachable_config(3);
    config.auto_reconnect = false;

    let session = PlayerSession::new(config, Arc::new(StubEngine)).unwrap();
    let states = run_to_terminal(&session).await;

    assert_eq!(
        states,
        vec![
            PlaybackState::Connecting,
            PlaybackState::Failed(FailureReason::ConnectFailed),
        ]
    );
    session.stop().await;
}

#[tokio::test]
async fn test_zero_attempts_fail_on_first_loss() {
    let session =
        PlayerSession::new(unreachable_config(0), Arc::new(StubEngine)).unwrap();
    let states = run_to_terminal(&session).await;

    // Budget of zero: no Reconnecting state at all
    assert_eq!(
        states,
        vec![
            PlaybackState::Connecting,
            PlaybackState::Failed(FailureReason::ReconnectExhausted),
        ]
    );
    session.stop().await;
}

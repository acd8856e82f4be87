//! Stream source integration tests
//!
//! Runs the HTTP front end against in-process TCP servers and checks
//! the chunk discipline: fixed 4096-byte chunks, one shorter final
//! chunk at end of body, exact event ordering, error classification.

mod helpers;

use airwave::config::StreamConfig;
use airwave::error::Error;
use airwave::stream::{StreamEvent, StreamSource, CHUNK_SIZE};
use helpers::serve_once;
use std::time::Duration;

async fn collect_events(
    mut rx: tokio::sync::mpsc::Receiver<StreamEvent>,
    expected: usize,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while events.len() < expected {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => break,
            Err(_) => panic!("Timed out after {} events: {:?}", events.len(), events),
        }
    }
    events
}

#[tokio::test]
async fn test_body_split_into_fixed_chunks() {
    // 10,050 bytes: two full chunks and a 1,858-byte tail
    let body: Vec<u8> = (0..10_050).map(|i| (i % 251) as u8).collect();
    let addr = serve_once("200 OK", body.clone()).await;

    let source = StreamSource::new();
    let config = StreamConfig::new(format!("http://{}/stream", addr));
    let rx = source.connect(&config).await;

    let events = collect_events(rx, 5).await;
    assert_eq!(events.len(), 5, "events: {:?}", events);

    assert!(matches!(events[0], StreamEvent::Connected));
    match (&events[1], &events[2], &events[3]) {
        (StreamEvent::Data(a), StreamEvent::Data(b), StreamEvent::Data(c)) => {
            assert_eq!(a.len(), CHUNK_SIZE);
            assert_eq!(b.len(), CHUNK_SIZE);
            assert_eq!(c.len(), 10_050 - 2 * CHUNK_SIZE);
            // No payload bytes lost or reordered across chunk boundaries
            let mut reassembled = Vec::new();
            reassembled.extend_from_slice(a);
            reassembled.extend_from_slice(b);
            reassembled.extend_from_slice(c);
            assert_eq!(reassembled, body);
        }
        other => panic!("Expected three data chunks, got {:?}", other),
    }
    assert!(matches!(events[4], StreamEvent::Disconnected));
}

#[tokio::test]
async fn test_exact_multiple_has_no_empty_tail() {
    let body = vec![7u8; CHUNK_SIZE * 2];
    let addr = serve_once("200 OK", body).await;

    let source = StreamSource::new();
    let config = StreamConfig::new(format!("http://{}/stream", addr));
    let rx = source.connect(&config).await;

    let events = collect_events(rx, 4).await;
    assert!(matches!(events[0], StreamEvent::Connected));
    assert!(matches!(&events[1], StreamEvent::Data(b) if b.len() == CHUNK_SIZE));
    assert!(matches!(&events[2], StreamEvent::Data(b) if b.len() == CHUNK_SIZE));
    // End of body goes straight to Disconnected, never a zero-length chunk
    assert!(matches!(events[3], StreamEvent::Disconnected));
}

#[tokio::test]
async fn test_non_200_reports_http_status() {
    let addr = serve_once("404 Not Found", Vec::new()).await;

    let source = StreamSource::new();
    let config = StreamConfig::new(format!("http://{}/stream", addr));
    let mut rx = source.connect(&config).await;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Error(Error::HttpStatus(404))) => {}
        other => panic!("Expected HttpStatus(404), got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_reports_connect_error() {
    // Bind then drop to get a port nothing is listening on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = StreamSource::new();
    let config = StreamConfig::new(format!("http://{}/stream", addr));
    let mut rx = source.connect(&config).await;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Error(Error::Connect(_))) => {}
        other => panic!("Expected Connect error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_discards_partial_chunk() {
    let server = helpers::DribbleServer::start().await;
    let source = StreamSource::new();
    let config = StreamConfig::new(server.url());
    let mut rx = source.connect(&config).await;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Connected) => {}
        other => panic!("Expected Connected, got {:?}", other),
    }

    // Less than one chunk in flight, then an explicit disconnect
    server.send_bytes(vec![1u8; 100]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    source.disconnect().await;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
    {
        // The 100 partial bytes never surface as Data
        Some(StreamEvent::Disconnected) => {}
        other => panic!("Expected Disconnected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connect_replaces_active_connection_silently() {
    let first = helpers::DribbleServer::start().await;
    let second = helpers::DribbleServer::start().await;
    let source = StreamSource::new();

    let mut first_rx = source.connect(&StreamConfig::new(first.url())).await;
    match tokio::time::timeout(Duration::from_secs(5), first_rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Connected) => {}
        other => panic!("Expected Connected, got {:?}", other),
    }
    first.send_chunks(1);
    match tokio::time::timeout(Duration::from_secs(5), first_rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Data(chunk)) => assert_eq!(chunk.len(), CHUNK_SIZE),
        other => panic!("Expected Data, got {:?}", other),
    }

    // Re-tune to the second server while the first transfer is live
    let mut second_rx = source.connect(&StreamConfig::new(second.url())).await;

    // The old sequence just ends: no Disconnected, no Error, only
    // whatever Data was already in flight
    loop {
        match tokio::time::timeout(Duration::from_secs(5), first_rx.recv())
            .await
            .expect("timed out draining old sequence")
        {
            Some(StreamEvent::Data(_)) => {}
            Some(other) => panic!("Old sequence emitted {:?} after replacement", other),
            None => break,
        }
    }

    match tokio::time::timeout(Duration::from_secs(5), second_rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Connected) => {}
        other => panic!("Expected Connected on new sequence, got {:?}", other),
    }
    second.send_chunks(1);
    match tokio::time::timeout(Duration::from_secs(5), second_rx.recv())
        .await
        .expect("timed out")
    {
        Some(StreamEvent::Data(chunk)) => assert_eq!(chunk.len(), CHUNK_SIZE),
        other => panic!("Expected Data on new sequence, got {:?}", other),
    }
}

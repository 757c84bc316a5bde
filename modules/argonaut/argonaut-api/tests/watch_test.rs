use std::time::Duration;

use argonaut_api::sse::{EventStreamReader, StreamConfig};
use argonaut_api::{CancellationToken, ErrorCategory, WatchEnd, WatchMessage, run_watch};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

fn event(n: u32) -> String {
    format!("data: {{\"result\":{n}}}\n\n")
}

#[tokio::test]
async fn test_cancel_unblocks_pending_send() {
    let (mut server, client) = tokio::io::duplex(64 * 1024);
    for n in 0..10 {
        server.write_all(event(n).as_bytes()).await.unwrap();
    }

    // capacity 1 and nobody receiving: the second send blocks
    let (tx, _rx) = mpsc::channel::<WatchMessage<u32>>(1);
    let cancel = CancellationToken::new();
    let reader = EventStreamReader::new(client, StreamConfig::default());
    let watch = tokio::spawn(run_watch("blocked", reader, tx, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!watch.is_finished());
    cancel.cancel();

    let end = tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .expect("watch loop did not stop after cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(end, WatchEnd::Cancelled);
    drop(server);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_data() {
    let (_server, client) = tokio::io::duplex(1024);
    let (tx, _rx) = mpsc::channel::<WatchMessage<u32>>(4);
    let cancel = CancellationToken::new();
    let reader = EventStreamReader::new(client, StreamConfig::default());
    let watch = tokio::spawn(run_watch("idle", reader, tx, cancel.clone()));

    cancel.cancel();
    let end = tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(end, WatchEnd::Cancelled);
}

#[tokio::test]
async fn test_oversized_event_fails_once() {
    let config = StreamConfig::new(16, 64, 128).unwrap();
    let mut stream = Vec::new();
    stream.extend_from_slice(event(1).as_bytes());
    stream.extend_from_slice(b"data: ");
    stream.extend(std::iter::repeat_n(b'x', 512));
    stream.extend_from_slice(b"\n\n");
    stream.extend_from_slice(event(2).as_bytes());

    let reader = EventStreamReader::new(stream.as_slice(), config);
    let (tx, mut rx) = mpsc::channel(8);
    let err = run_watch::<u32, _>("big", reader, tx, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_code("EVENT_TOO_LARGE"));
    assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
    assert!(!err.is_recoverable());

    let mut messages = Vec::new();
    while let Some(message) = rx.recv().await {
        messages.push(message);
    }
    assert_eq!(messages.len(), 2);
    assert!(matches!(messages[0], WatchMessage::Event(1)));
    match &messages[1] {
        WatchMessage::Failed(failed) => assert_eq!(failed, &err),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_error_is_recoverable_network_failure() {
    let source = tokio_test::io::Builder::new()
        .read(event(7).as_bytes())
        .read_error(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))
        .build();
    let reader = EventStreamReader::new(source, StreamConfig::default());
    let (tx, mut rx) = mpsc::channel(8);
    let err = run_watch::<u32, _>("reset", reader, tx, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_code("STREAM_READ_FAILED"));
    assert!(err.is_recoverable());
    assert!(matches!(rx.recv().await, Some(WatchMessage::Event(7))));
    assert!(matches!(rx.recv().await, Some(WatchMessage::Failed(_))));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_large_events_survive_mode_switch() {
    // events bigger than a quarter of the buffer ceiling force direct accumulation
    let config = StreamConfig::new(32, 256, 4096).unwrap();
    let payload = "y".repeat(200);
    let mut stream = String::new();
    for _ in 0..3 {
        stream.push_str(&format!("data: {{\"result\":\"{payload}\"}}\n\n"));
    }

    let reader = EventStreamReader::new(stream.as_bytes(), config);
    let (tx, mut rx) = mpsc::channel(8);
    let end = run_watch::<String, _>("large", reader, tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(end, WatchEnd::Completed);

    let mut count = 0;
    while let Some(message) = rx.recv().await {
        match message {
            WatchMessage::Event(value) => assert_eq!(value, payload),
            WatchMessage::Failed(err) => panic!("unexpected failure: {err}"),
        }
        count += 1;
    }
    assert_eq!(count, 3);
}

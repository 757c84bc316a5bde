//! Drives one event-stream subscription into a bounded channel.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::sse::{EventStreamReader, Frame};

/// Item delivered to the consumer of a watch.
#[derive(Debug, Clone)]
pub enum WatchMessage<T> {
    Event(T),
    /// The subscription failed. Always the last message of a watch.
    Failed(ApiError),
}

/// Why a watch ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// The server closed the stream.
    Completed,
    /// The cancellation token fired.
    Cancelled,
    /// The consumer dropped its receiver.
    ReceiverClosed,
}

#[derive(Deserialize)]
struct StreamEnvelope<T> {
    result: T,
}

enum Delivery {
    Sent,
    Stopped(WatchEnd),
}

/// Run the watch loop until the stream ends, fails, or `cancel` fires.
///
/// Every decoded event is sent to `tx`. Sends race `cancel`, so a full or
/// abandoned channel never blocks the loop after cancellation. Malformed
/// events are logged and skipped.
///
/// # Errors
/// Returns the failure after delivering it once as
/// [`WatchMessage::Failed`]. Size-exceeded failures carry the
/// `EVENT_TOO_LARGE` code.
pub async fn run_watch<T, R>(
    label: &str,
    mut reader: EventStreamReader<R>,
    tx: mpsc::Sender<WatchMessage<T>>,
    cancel: CancellationToken,
) -> Result<WatchEnd, ApiError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let outcome = drive(label, &mut reader, &tx, &cancel).await;
    let metrics = reader.close();
    match &outcome {
        Ok(end) => info!(
            watch = label,
            end = ?end,
            events = metrics.events_emitted,
            buffer_resizes = metrics.buffer_resizes,
            max_event_size = metrics.max_event_size,
            "watch ended"
        ),
        Err(err) => warn!(
            watch = label,
            code = err.code(),
            error = %err,
            events = metrics.events_emitted,
            buffer_resizes = metrics.buffer_resizes,
            max_event_size = metrics.max_event_size,
            "watch failed"
        ),
    }
    outcome
}

async fn drive<T, R>(
    label: &str,
    reader: &mut EventStreamReader<R>,
    tx: &mpsc::Sender<WatchMessage<T>>,
    cancel: &CancellationToken,
) -> Result<WatchEnd, ApiError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(WatchEnd::Cancelled),
            frame = reader.read_event() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                let err = ApiError::from(err).with_context("watch", label);
                // the error is returned whether or not the consumer saw it
                let _ = deliver(tx, cancel, WatchMessage::Failed(err.clone())).await;
                return Err(err);
            }
        };

        let (bytes, last) = match frame {
            Frame::Event(bytes) => (bytes, false),
            Frame::Trailing(bytes) => (bytes, true),
            Frame::End => return Ok(WatchEnd::Completed),
        };

        if let Some(event) = decode_event::<T>(label, &bytes)
            && let Delivery::Stopped(end) = deliver(tx, cancel, WatchMessage::Event(event)).await
        {
            return Ok(end);
        }

        if last {
            return Ok(WatchEnd::Completed);
        }
    }
}

async fn deliver<T>(
    tx: &mpsc::Sender<WatchMessage<T>>,
    cancel: &CancellationToken,
    message: WatchMessage<T>,
) -> Delivery {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!("cancelled while delivering, dropping event");
            Delivery::Stopped(WatchEnd::Cancelled)
        }
        sent = tx.send(message) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Stopped(WatchEnd::ReceiverClosed),
        },
    }
}

/// Decode one raw event into `T`.
///
/// `data:` lines are joined with newlines and parsed as `{"result": T}`.
/// Blank lines, `:` comments and other fields are ignored. Returns `None`
/// for keep-alive-only events and for payloads that do not parse.
pub fn decode_event<T: DeserializeOwned>(label: &str, raw: &[u8]) -> Option<T> {
    let Ok(text) = std::str::from_utf8(raw) else {
        warn!(watch = label, bytes = raw.len(), "dropping event that is not valid UTF-8");
        return None;
    };

    let mut payload = String::new();
    let mut data_lines = 0usize;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        if data_lines > 0 {
            payload.push('\n');
        }
        payload.push_str(data.strip_prefix(' ').unwrap_or(data));
        data_lines += 1;
    }

    if data_lines == 0 {
        return None;
    }

    match serde_json::from_str::<StreamEnvelope<T>>(&payload) {
        Ok(envelope) => Some(envelope.result),
        Err(e) => {
            warn!(watch = label, error = %e, payload_len = payload.len(), "dropping malformed event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tracing_test::traced_test;

    #[test]
    fn decodes_single_data_line() {
        let event: Option<Value> = decode_event("t", b"data: {\"result\":{\"type\":\"ADDED\"}}\n\n");
        assert_eq!(event.unwrap()["type"], "ADDED");
    }

    #[test]
    fn joins_multi_line_payloads() {
        let raw = b"data: {\"result\":\ndata: [1,2,3]}\n\n";
        let event: Option<Vec<u32>> = decode_event("t", raw);
        assert_eq!(event.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let raw = b": keep-alive\r\nevent: update\r\nid: 7\r\ndata:{\"result\":5}\r\n\r\n";
        let event: Option<u32> = decode_event("t", raw);
        assert_eq!(event, Some(5));
    }

    #[test]
    fn keep_alive_only_event_is_skipped() {
        let event: Option<Value> = decode_event("t", b":\n\n");
        assert!(event.is_none());
    }

    #[traced_test]
    #[test]
    fn malformed_payload_is_dropped_and_logged() {
        let event: Option<Value> = decode_event("apps", b"data: {not json\n\n");
        assert!(event.is_none());
        assert!(logs_contain("dropping malformed event"));
    }

    #[test]
    fn invalid_utf8_is_dropped() {
        let event: Option<Value> = decode_event("t", b"data: \xff\xfe\n\n");
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn delivers_events_then_completes() {
        let stream: &[u8] = b"data: {\"result\":1}\n\n: ping\n\ndata: {\"result\":2}\n\ndata: {\"result\":3}";
        let reader = EventStreamReader::new(stream, crate::sse::StreamConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let end = run_watch::<u32, _>("t", reader, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(end, WatchEnd::Completed);

        let mut seen = Vec::new();
        while let Some(WatchMessage::Event(n)) = rx.recv().await {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_receiver_ends_the_watch() {
        let stream: &[u8] = b"data: {\"result\":1}\n\n";
        let reader = EventStreamReader::new(stream, crate::sse::StreamConfig::default());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let end = run_watch::<u32, _>("t", reader, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(end, WatchEnd::ReceiverClosed);
    }
}

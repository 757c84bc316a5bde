use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use super::config::StreamConfig;
use super::pool;
use crate::error::StreamError;

/// Event terminator: a blank line.
const BOUNDARY: &[u8] = b"\n\n";

/// Buffering strategy of a reader.
///
/// Starts as [`ReadMode::FastPath`]. The only transition is
/// [`ReadMode::escalate`], which always lands on
/// [`ReadMode::DirectAccumulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    FastPath,
    DirectAccumulation,
}

impl ReadMode {
    #[must_use]
    pub fn escalate(self) -> Self {
        ReadMode::DirectAccumulation
    }
}

/// Snapshot of a reader's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderMetrics {
    pub buffer_resizes: usize,
    pub max_event_size: usize,
    pub current_buffer_size: usize,
    pub accumulated_bytes: usize,
    pub events_emitted: usize,
}

/// One step of a stream read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete event, terminator included.
    Event(Bytes),
    /// Unterminated bytes left when the stream ended. No more frames follow.
    Trailing(Bytes),
    /// The stream ended with nothing buffered.
    End,
}

impl Frame {
    #[must_use]
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Frame::Event(bytes) | Frame::Trailing(bytes) => Some(bytes),
            Frame::End => None,
        }
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Frame::Trailing(_) | Frame::End)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Exhausted,
    Failed,
}

/// Splits a byte stream into blank-line terminated events with bounded
/// memory.
///
/// Both modes pull from the same buffered source into the same
/// accumulation area, so bytes already read are never lost when the
/// reader escalates. `read_event` must not be called concurrently.
pub struct EventStreamReader<R> {
    source: BufReader<R>,
    buffer: Vec<u8>,
    accumulated: BytesMut,
    /// Prefix of `accumulated` already searched for a boundary.
    scanned: usize,
    mode: ReadMode,
    lifecycle: Lifecycle,
    config: StreamConfig,
    metrics: ReaderMetrics,
}

impl<R> std::fmt::Debug for EventStreamReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamReader")
            .field("buffer", &self.buffer.len())
            .field("accumulated", &self.accumulated.len())
            .field("scanned", &self.scanned)
            .field("mode", &self.mode)
            .field("lifecycle", &self.lifecycle)
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> EventStreamReader<R> {
    pub fn new(stream: R, config: StreamConfig) -> Self {
        let size = config.initial_buffer_size();
        Self {
            // Single byte source for both modes. `buffer` never shrinks below
            // this capacity, so reads pass straight through it.
            source: BufReader::with_capacity(size, stream),
            buffer: pool::acquire(size),
            accumulated: BytesMut::with_capacity(size),
            scanned: 0,
            mode: ReadMode::FastPath,
            lifecycle: Lifecycle::Open,
            config,
            metrics: ReaderMetrics {
                current_buffer_size: size,
                ..ReaderMetrics::default()
            },
        }
    }

    /// Read the next event.
    ///
    /// # Errors
    /// [`StreamError::EventTooLarge`] when a single event outgrows
    /// `max_accumulated_size`; the reader is unusable afterwards and further
    /// calls return [`StreamError::Unusable`]. [`StreamError::Io`] when the
    /// underlying stream fails.
    pub async fn read_event(&mut self) -> Result<Frame, StreamError> {
        match self.lifecycle {
            Lifecycle::Open => {}
            Lifecycle::Exhausted => return Ok(Frame::End),
            Lifecycle::Failed => return Err(StreamError::Unusable),
        }

        loop {
            if let Some(event) = self.take_event()? {
                return Ok(Frame::Event(event));
            }
            self.check_ceiling()?;

            if self.mode == ReadMode::FastPath
                && self.accumulated.len() > self.config.fast_path_limit()
            {
                self.escalate();
            }

            let read = self.source.read(&mut self.buffer).await?;
            if read == 0 {
                return Ok(self.finish());
            }
            self.accumulated.extend_from_slice(&self.buffer[..read]);
            self.metrics.accumulated_bytes = self.accumulated.len();

            if self.mode == ReadMode::DirectAccumulation && read == self.buffer.len() {
                self.grow_buffer();
            }
        }
    }

    #[must_use]
    pub fn metrics(&self) -> ReaderMetrics {
        self.metrics
    }

    #[must_use]
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Release the stream and return the final metrics. A default-sized
    /// read buffer goes back to the shared pool.
    #[must_use]
    pub fn close(self) -> ReaderMetrics {
        self.metrics
    }

    /// Split off the first complete event, if the accumulation holds one.
    fn take_event(&mut self) -> Result<Option<Bytes>, StreamError> {
        // the boundary may straddle the previously scanned prefix
        let from = self.scanned.saturating_sub(BOUNDARY.len() - 1);
        let Some(offset) = find_boundary(&self.accumulated[from..]) else {
            self.scanned = self.accumulated.len();
            return Ok(None);
        };
        let end = from + offset + BOUNDARY.len();
        if end > self.config.max_accumulated_size() {
            return Err(self.fail(end));
        }
        let event = self.accumulated.split_to(end).freeze();
        self.scanned = 0;
        self.record_event(event.len());
        Ok(Some(event))
    }

    fn check_ceiling(&mut self) -> Result<(), StreamError> {
        let size = self.accumulated.len();
        if size > self.config.max_accumulated_size() {
            return Err(self.fail(size));
        }
        Ok(())
    }

    fn fail(&mut self, size: usize) -> StreamError {
        self.lifecycle = Lifecycle::Failed;
        let limit = self.config.max_accumulated_size();
        tracing::warn!(size, limit, "stream event exceeds maximum size");
        StreamError::EventTooLarge { size, limit }
    }

    fn finish(&mut self) -> Frame {
        self.lifecycle = Lifecycle::Exhausted;
        if self.accumulated.is_empty() {
            return Frame::End;
        }
        let trailing = self.accumulated.split().freeze();
        self.scanned = 0;
        self.record_event(trailing.len());
        Frame::Trailing(trailing)
    }

    fn record_event(&mut self, size: usize) {
        self.metrics.events_emitted += 1;
        self.metrics.max_event_size = self.metrics.max_event_size.max(size);
        self.metrics.accumulated_bytes = self.accumulated.len();
    }

    fn escalate(&mut self) {
        self.mode = self.mode.escalate();
        tracing::debug!(
            accumulated = self.accumulated.len(),
            buffer = self.buffer.len(),
            "large stream event, switching to direct accumulation"
        );
        // already at the ceiling is fine, reading continues at this size
        self.grow_buffer();
    }

    fn grow_buffer(&mut self) -> bool {
        let current = self.buffer.len();
        if current >= self.config.max_buffer_size() {
            return false;
        }
        let next = self.config.next_buffer_size(current);
        let previous = std::mem::replace(&mut self.buffer, vec![0; next]);
        pool::release(previous);
        self.metrics.buffer_resizes += 1;
        self.metrics.current_buffer_size = next;
        tracing::debug!(from = current, to = next, "grew stream read buffer");
        true
    }
}

impl<R> Drop for EventStreamReader<R> {
    fn drop(&mut self) {
        pool::release(std::mem::take(&mut self.buffer));
    }
}

fn find_boundary(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(BOUNDARY.len())
        .position(|window| window == BOUNDARY)
}

//! Bounded-memory server-sent events framing.

mod config;
mod pool;
mod reader;

pub use config::{
    DEFAULT_INITIAL_BUFFER, DEFAULT_MAX_ACCUMULATED, DEFAULT_MAX_BUFFER, GrowthSteps, KIB, MIB,
    StreamConfig,
};
pub use pool::pooled_buffer_size;
pub use reader::{EventStreamReader, Frame, ReadMode, ReaderMetrics};

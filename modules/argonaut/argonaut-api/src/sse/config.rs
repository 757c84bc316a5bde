use serde::Deserialize;

use crate::error::{ApiError, ErrorCategory};

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

pub const DEFAULT_INITIAL_BUFFER: usize = 256 * KIB;
pub const DEFAULT_MAX_BUFFER: usize = 16 * MIB;
pub const DEFAULT_MAX_ACCUMULATED: usize = 32 * MIB;

/// Per-tier growth increments. The tiers are buffers below 1 MiB,
/// below 4 MiB, below 8 MiB, and everything above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GrowthSteps {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    pub extra_large: usize,
}

impl Default for GrowthSteps {
    fn default() -> Self {
        Self {
            small: 256 * KIB,
            medium: 512 * KIB,
            large: MIB,
            extra_large: 2 * MIB,
        }
    }
}

/// Immutable configuration for one event-stream reader.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawStreamConfig")]
pub struct StreamConfig {
    initial_buffer_size: usize,
    max_buffer_size: usize,
    max_accumulated_size: usize,
    growth: GrowthSteps,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawStreamConfig {
    initial_buffer_size: usize,
    max_buffer_size: usize,
    max_accumulated_size: usize,
    growth: GrowthSteps,
}

impl Default for RawStreamConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: DEFAULT_INITIAL_BUFFER,
            max_buffer_size: DEFAULT_MAX_BUFFER,
            max_accumulated_size: DEFAULT_MAX_ACCUMULATED,
            growth: GrowthSteps::default(),
        }
    }
}

impl TryFrom<RawStreamConfig> for StreamConfig {
    type Error = ApiError;

    fn try_from(raw: RawStreamConfig) -> Result<Self, Self::Error> {
        Ok(Self::new(
            raw.initial_buffer_size,
            raw.max_buffer_size,
            raw.max_accumulated_size,
        )?
        .with_growth(raw.growth))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: DEFAULT_INITIAL_BUFFER,
            max_buffer_size: DEFAULT_MAX_BUFFER,
            max_accumulated_size: DEFAULT_MAX_ACCUMULATED,
            growth: GrowthSteps::default(),
        }
    }
}

impl StreamConfig {
    /// Build a configuration with default growth steps.
    ///
    /// # Errors
    /// Returns a validation error unless
    /// `0 < initial_buffer_size <= max_buffer_size <= max_accumulated_size`.
    pub fn new(
        initial_buffer_size: usize,
        max_buffer_size: usize,
        max_accumulated_size: usize,
    ) -> Result<Self, ApiError> {
        if initial_buffer_size == 0
            || initial_buffer_size > max_buffer_size
            || max_buffer_size > max_accumulated_size
        {
            return Err(ApiError::new(
                ErrorCategory::Validation,
                "INVALID_STREAM_CONFIG",
                format!(
                    "Stream buffers must satisfy 0 < initial ({initial_buffer_size}) <= max ({max_buffer_size}) <= accumulated ({max_accumulated_size})"
                ),
            )
            .with_user_action("Check the ARGONAUT_SSE_* settings"));
        }
        Ok(Self {
            initial_buffer_size,
            max_buffer_size,
            max_accumulated_size,
            growth: GrowthSteps::default(),
        })
    }

    #[must_use]
    pub fn with_growth(mut self, growth: GrowthSteps) -> Self {
        self.growth = growth;
        self
    }

    /// Defaults overridden by `ARGONAUT_SSE_INITIAL_BUFFER`,
    /// `ARGONAUT_SSE_MAX_BUFFER` and `ARGONAUT_SSE_MAX_ACCUMULATED`.
    ///
    /// Unparsable or zero values are ignored, as is a max buffer that is not
    /// larger than the initial one.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(initial) = env_size("ARGONAUT_SSE_INITIAL_BUFFER") {
            config.initial_buffer_size = initial;
        }
        if let Some(max) = env_size("ARGONAUT_SSE_MAX_BUFFER")
            && max > config.initial_buffer_size
        {
            config.max_buffer_size = max;
        }
        if let Some(accumulated) = env_size("ARGONAUT_SSE_MAX_ACCUMULATED") {
            config.max_accumulated_size = accumulated;
        }
        config.initial_buffer_size = config.initial_buffer_size.min(config.max_buffer_size);
        config.max_accumulated_size = config.max_accumulated_size.max(config.max_buffer_size);
        config
    }

    #[must_use]
    pub fn initial_buffer_size(&self) -> usize {
        self.initial_buffer_size
    }

    #[must_use]
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    #[must_use]
    pub fn max_accumulated_size(&self) -> usize {
        self.max_accumulated_size
    }

    #[must_use]
    pub fn growth(&self) -> GrowthSteps {
        self.growth
    }

    /// Accumulated size above which the fast path gives up on a stream.
    pub(super) fn fast_path_limit(&self) -> usize {
        // a quarter of the buffer ceiling
        self.max_buffer_size >> 2
    }

    /// Next buffer size after `current`, tiered and capped at the ceiling.
    #[must_use]
    pub fn next_buffer_size(&self, current: usize) -> usize {
        let increment = match current {
            c if c < MIB => self.growth.small,
            c if c < 4 * MIB => self.growth.medium,
            c if c < 8 * MIB => self.growth.large,
            _ => self.growth.extra_large,
        };
        current.saturating_add(increment).min(self.max_buffer_size)
    }
}

fn env_size(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

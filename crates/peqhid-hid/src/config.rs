//! Session configuration.

use std::time::Duration;

use peqhid_core::{ByteOrder, GainCodec};
use serde::{Deserialize, Serialize};

/// Timing and codec settings for a [`crate::PeqSession`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to wait for a device reply, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How often the completion predicate is checked, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Scale and byte order of the global gain field
    #[serde(default)]
    pub global_gain: GainCodec,
    /// Byte order of the filter-params fields
    #[serde(default)]
    pub filter_byte_order: ByteOrder,
}

impl SessionConfig {
    /// Reply timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval, never zero.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            global_gain: GainCodec::default(),
            filter_byte_order: ByteOrder::default(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

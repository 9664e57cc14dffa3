//! Station configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use teststand::config::{OverflowPolicy, StationConfig};
//!
//! let config = StationConfig::from_json(r#"{"worker_count": 2, "overflow_policy": "drop_oldest"}"#).unwrap();
//! assert_eq!(config.worker_count, 2);
//! assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
//! assert_eq!(config.ring_capacity, 4096);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StationError};
use crate::protocol::{DEFAULT_RING_CAPACITY, MIN_FRAME_LEN};

/// Default command queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default number of worker threads.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Default dispatcher poll interval in milliseconds.
pub const DEFAULT_DISPATCH_POLL_MS: u64 = 10;

/// Default outbound frame backlog.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default transport read size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// What a bounded queue does when a push finds it full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the push with `QueueFull`.
    #[default]
    Reject,
    /// Evict the oldest entry to make room.
    DropOldest,
    /// Wait until a consumer makes room.
    Block,
}

/// What the decoder does with a frame repeating the last accepted sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Deliver it again; commands are treated as idempotent.
    #[default]
    Accept,
    /// Consume it silently and report a retry.
    Reject,
}

/// Identity reported in the handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StationIdentity {
    pub model: String,
    pub version: String,
}

impl Default for StationIdentity {
    fn default() -> Self {
        Self {
            model: "TESTSTAND".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Full station configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Inbound ring capacity in bytes.
    pub ring_capacity: usize,
    /// Maximum decoded commands waiting for dispatch.
    pub queue_capacity: usize,
    /// Command queue behavior when full.
    pub overflow_policy: OverflowPolicy,
    /// Decoder behavior on a repeated sequence number.
    pub duplicate_policy: DuplicatePolicy,
    /// Number of test worker threads.
    pub worker_count: usize,
    /// Dispatcher timed-pop interval in milliseconds.
    pub dispatch_poll_ms: u64,
    /// Maximum encoded frames waiting for the transport.
    pub outbound_capacity: usize,
    /// Bytes requested per transport read.
    pub read_buffer_size: usize,
    /// Prefix outbound content with the 0x04 marker byte.
    pub legacy_content_marker: bool,
    /// Handshake identity.
    pub identity: StationIdentity,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
            worker_count: DEFAULT_WORKER_COUNT,
            dispatch_poll_ms: DEFAULT_DISPATCH_POLL_MS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            legacy_content_marker: false,
            identity: StationIdentity::default(),
        }
    }
}

impl StationConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the ring cannot hold a minimal frame.
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity < MIN_FRAME_LEN {
            return Err(StationError::Config(format!(
                "ring_capacity {} is below the {}-byte minimum frame",
                self.ring_capacity, MIN_FRAME_LEN
            )));
        }
        Ok(())
    }

    /// Dispatcher poll interval.
    #[inline]
    pub fn dispatch_poll(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StationConfig::default();
        assert_eq!(config.ring_capacity, 4096);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Accept);
        assert_eq!(config.dispatch_poll(), Duration::from_millis(10));
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(StationConfig::from_json("{}").unwrap(), StationConfig::default());
    }

    #[test]
    fn test_nested_identity() {
        let config =
            StationConfig::from_json(r#"{"identity": {"model": "ZY3588"}, "duplicate_policy": "reject"}"#)
                .unwrap();
        assert_eq!(config.identity.model, "ZY3588");
        assert_eq!(config.identity.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
    }

    #[test]
    fn test_ring_smaller_than_frame_rejected() {
        let config = StationConfig {
            ring_capacity: MIN_FRAME_LEN - 1,
            ..StationConfig::default()
        };
        assert!(matches!(config.validate(), Err(StationError::Config(_))));
        assert!(StationConfig::from_json(r#"{"ring_capacity": 4}"#).is_err());

        let smallest = StationConfig {
            ring_capacity: MIN_FRAME_LEN,
            ..StationConfig::default()
        };
        assert!(smallest.validate().is_ok());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert!(StationConfig::from_json(r#"{"overflow_policy": "sometimes"}"#).is_err());
    }
}

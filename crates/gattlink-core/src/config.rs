use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::DEFAULT_MTU;

/// Default time `send_and_wait` waits for the reply notification.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum bytes per link-level write.
    pub mtu: usize,
    /// Deadline for the reply notification of `send_and_wait`.
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,
    /// Stop issuing chunks after the first failed write instead of
    /// continuing and reporting the last error.
    pub abort_on_chunk_error: bool,
    /// Keep every packet in the ledger; when off only byte counters move.
    pub packet_cache_enabled: bool,
    /// Clear the ledger when the peripheral reconnects.
    pub reset_packets_on_reconnect: bool,
    /// When non-zero, plain sends acknowledge every k-th chunk and write the
    /// rest without response. `0` keeps the write mode chosen at enable time.
    pub interleave_ack_every: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            abort_on_chunk_error: false,
            packet_cache_enabled: true,
            reset_packets_on_reconnect: true,
            interleave_ack_every: 0,
        }
    }
}

impl TransportConfig {
    /// Parses a TOML document, filling unspecified fields with defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu == 0 {
            return Err(ConfigError::Invalid("mtu must be non-zero"));
        }
        if self.reply_timeout.is_zero() {
            return Err(ConfigError::Invalid("reply_timeout must be non-zero"));
        }
        Ok(())
    }
}

use thiserror::Error;

/// Errors surfaced by the central-side transport (sends, replies, notify setup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Target characteristic handle is missing or no longer valid.
    #[error("characteristic no longer valid")]
    InvalidCharacteristic,
    /// Remote rejected the notification subscription request.
    #[error("enable notify failed")]
    EnableNotifyFailed,
    /// Reply deadline elapsed before a notification arrived.
    #[error("timed out waiting for reply")]
    Timeout,
    /// Connection dropped while the operation was in progress.
    #[error("peripheral disconnected")]
    Disconnected,
    /// Operation aborted by the caller.
    #[error("operation cancelled")]
    Cancelled,
    /// Send called with nothing to write.
    #[error("payload is empty")]
    EmptyPayload,
    /// One link-level write failed.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// Remote attribute server answered with an error response.
    #[error("attribute error: {0}")]
    Att(#[from] AttError),
    /// Radio stack failure outside the categories above.
    #[error("radio backend error: {0}")]
    Backend(String),
}

/// Attribute-protocol errors answered by the peripheral-side server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AttError {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("read not permitted")]
    ReadNotPermitted,
    #[error("write not permitted")]
    WriteNotPermitted,
    #[error("invalid offset")]
    InvalidOffset,
}

impl AttError {
    /// Attribute protocol error code carried in an error response.
    pub fn code(self) -> u8 {
        match self {
            Self::InvalidHandle => 0x01,
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::InvalidOffset => 0x07,
        }
    }
}

/// Configuration parse/validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

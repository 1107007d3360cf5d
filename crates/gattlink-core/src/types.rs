use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Link payload size assumed when the stack has not negotiated a larger one.
pub const DEFAULT_MTU: usize = 20;

/// Opaque remote endpoint identifier (central or peripheral address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Whether a packet was sent or received by the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Tx,
    Rx,
}

/// One application-level message, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub timestamp: SystemTime,
    pub direction: Direction,
    pub peer_id: Option<PeerId>,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(direction: Direction, peer_id: Option<PeerId>, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            direction,
            peer_id,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Link-level write flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteMode {
    /// Write request; the peer answers each write with a response.
    Acknowledged,
    /// Write command; completes once the stack has queued it.
    Unacknowledged,
}

impl WriteMode {
    /// Picks the write mode for a characteristic from its declared capabilities.
    ///
    /// Write-without-response is used when offered; otherwise writes are
    /// acknowledged.
    pub fn for_properties(properties: CharacteristicProperties) -> Self {
        if properties.write_without_response {
            Self::Unacknowledged
        } else {
            Self::Acknowledged
        }
    }
}

/// Declared capabilities of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    pub const READ_ONLY: Self = Self {
        read: true,
        write: false,
        write_without_response: false,
        notify: false,
    };

    pub fn readable(&self) -> bool {
        self.read
    }

    /// Writable by either write flavour.
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn notifiable(&self) -> bool {
        self.notify
    }
}

/// Running byte totals; monotonic until reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounters {
    pub sent: u64,
    pub received: u64,
}

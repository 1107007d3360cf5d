//! Core gattlink primitives shared across crates.
//!
//! Includes the command checksum, packet and characteristic types, well-known
//! service UUIDs, transport configuration, and base errors.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;
pub mod uuids;

pub use checksum::{append_checksum, checksum8, strip_checksum, verify_checksum};
pub use config::TransportConfig;
pub use error::{AttError, ConfigError, LinkError};
pub use types::{
    ByteCounters, CharacteristicProperties, Direction, Packet, PeerId, WriteMode, DEFAULT_MTU,
};

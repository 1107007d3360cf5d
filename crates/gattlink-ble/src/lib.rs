//! Central-role transport engine for gattlink.
//!
//! Chunks outbound buffers into link-sized writes, correlates a send with the
//! next reply notification, and keeps the per-peripheral UART state in a
//! [`PeripheralSession`]. The radio itself is abstracted behind
//! `gattlink_transport::RadioLink`. Enable the `btleplug` feature for the
//! hardware backend.

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;
pub mod chunking;
pub mod protocol;
pub mod reply;
pub mod session;

pub use chunking::{ChunkedSender, ProgressFn};
pub use protocol::{is_uart_advertised, WritePlan};
pub use reply::ReplyCorrelator;
pub use session::PeripheralSession;

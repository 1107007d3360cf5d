//! Radio-link abstractions for gattlink.
//!
//! The central-side sender, reply correlator and session only depend on the
//! [`RadioLink`] trait and the [`PacketLedger`] defined in this crate.

pub mod ledger;
pub mod link;
pub mod mock;

pub use ledger::{LedgerObserverId, PacketLedger};
pub use link::{CharacteristicHandle, LinkEvent, LinkHealthSnapshot, RadioLink};
pub use mock::{MockRadioLink, RecordedWrite};

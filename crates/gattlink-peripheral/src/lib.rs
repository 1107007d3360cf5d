//! Peripheral-role emulation for gattlink.
//!
//! An [`AttributeServer`] holds the registered services and their values,
//! answers ATT read/write requests, tracks subscribers and drives advertising
//! through a [`PeripheralAdapter`]. [`LoopbackLink`] connects a central-side
//! session to a server in-process.

pub mod adapter;
pub mod att;
pub mod loopback;
pub mod server;
pub mod service;
pub mod subscriptions;
pub mod uart;

pub use adapter::{Advertisement, MockPeripheralAdapter, PeripheralAdapter};
pub use att::{ReadRequest, WriteRequest, MAX_ATTRIBUTE_LEN};
pub use loopback::{LoopbackAdapter, LoopbackLink, SharedServer};
pub use server::{AdvertisingState, AttributeServer};
pub use service::{CharacteristicRecord, DeviceInfo, PeripheralService, ServiceObserver};
pub use subscriptions::SubscriptionRegistry;
pub use uart::UartPeripheral;

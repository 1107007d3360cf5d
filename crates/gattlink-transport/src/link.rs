use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use gattlink_core::{CharacteristicProperties, LinkError, PeerId, WriteMode, DEFAULT_MTU};
use uuid::Uuid;

/// Coarse per-link write counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkHealthSnapshot {
    pub writes_ok: u64,
    pub writes_err: u64,
    pub last_error: Option<String>,
}

impl LinkHealthSnapshot {
    /// Folds the outcome of one link-level write into the counters.
    pub fn record_write(&mut self, result: &Result<(), LinkError>) {
        match result {
            Ok(()) => self.writes_ok += 1,
            Err(err) => {
                self.writes_err += 1;
                self.last_error = Some(err.to_string());
            }
        }
    }
}

/// A characteristic discovered on the connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharacteristicProperties,
}

impl CharacteristicHandle {
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }

    /// Write mode used for data written to this characteristic.
    pub fn write_mode(&self) -> WriteMode {
        WriteMode::for_properties(self.properties)
    }
}

/// Asynchronous events raised by the radio stack for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { peer: PeerId },
    Disconnected { peer: PeerId },
    RssiUpdated(i16),
    /// Value notified by the peripheral on a subscribed characteristic.
    Notification { characteristic: Uuid, value: Bytes },
}

/// Central-side contract over a connected peripheral.
///
/// Each call resolves when the radio stack reports completion of the
/// operation. Implementations must not reorder writes issued sequentially.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Resolves `uuid` inside `service_uuid` on the connected peripheral.
    async fn discover_characteristic(
        &self,
        uuid: Uuid,
        service_uuid: Uuid,
    ) -> Result<CharacteristicHandle, LinkError>;

    /// Issues one link-level write of at most [`RadioLink::mtu`] bytes.
    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError>;

    /// Enables or disables value notifications.
    async fn set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), LinkError>;

    /// Reads the current value; `None` when the peripheral holds no value.
    async fn read_value(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Bytes>, LinkError>;

    /// Maximum bytes per link-level write.
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    /// Identifier of the connected peripheral, when known.
    fn peer_id(&self) -> Option<PeerId> {
        None
    }

    /// Best-effort write counters.
    fn health_snapshot(&self) -> LinkHealthSnapshot {
        LinkHealthSnapshot::default()
    }
}

#[async_trait]
impl<L: RadioLink + ?Sized> RadioLink for Arc<L> {
    async fn discover_characteristic(
        &self,
        uuid: Uuid,
        service_uuid: Uuid,
    ) -> Result<CharacteristicHandle, LinkError> {
        (**self).discover_characteristic(uuid, service_uuid).await
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError> {
        (**self).write(characteristic, data, mode).await
    }

    async fn set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), LinkError> {
        (**self).set_notify(characteristic, enabled).await
    }

    async fn read_value(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Bytes>, LinkError> {
        (**self).read_value(characteristic).await
    }

    fn mtu(&self) -> usize {
        (**self).mtu()
    }

    fn peer_id(&self) -> Option<PeerId> {
        (**self).peer_id()
    }

    fn health_snapshot(&self) -> LinkHealthSnapshot {
        (**self).health_snapshot()
    }
}

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use gattlink_core::uuids::{
    DIS_FIRMWARE_REVISION_UUID, DIS_HARDWARE_REVISION_UUID, DIS_MANUFACTURER_NAME_UUID,
    DIS_MODEL_NUMBER_UUID, DIS_SERIAL_NUMBER_UUID, DIS_SERVICE_UUID, DIS_SOFTWARE_REVISION_UUID,
    UART_RX_CHAR_UUID, UART_SERVICE_UUID, UART_TX_CHAR_UUID,
};
use gattlink_core::{CharacteristicProperties, PeerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Callbacks from the attribute server to the owner of a service.
///
/// Invoked while the server is being mutated; implementations must not call
/// back into the server.
pub trait ServiceObserver: Send + Sync {
    /// A validated write batch stored `written` at some offset of `characteristic`.
    fn on_write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        peer: Option<&PeerId>,
        written: &[u8],
    );

    fn on_subscription_changed(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        _peer: &PeerId,
        _subscribed: bool,
    ) {
    }
}

/// One characteristic of a registered service and its current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub value: Option<Bytes>,
}

impl CharacteristicRecord {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Strings published by the Device Information service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
}

/// A service exposed by the attribute server.
#[derive(Clone)]
pub struct PeripheralService {
    uuid: Uuid,
    name: String,
    enabled: bool,
    characteristics: Vec<CharacteristicRecord>,
    observer: Option<Arc<dyn ServiceObserver>>,
}

impl fmt::Debug for PeripheralService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralService")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("characteristics", &self.characteristics)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl PeripheralService {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            enabled: true,
            characteristics: Vec::new(),
            observer: None,
        }
    }

    /// UART service: TX accepts both write flavours, RX is read + notify.
    pub fn uart() -> Self {
        Self::new(UART_SERVICE_UUID, "UART")
            .with_characteristic(CharacteristicRecord::new(
                UART_TX_CHAR_UUID,
                CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..CharacteristicProperties::default()
                },
            ))
            .with_characteristic(CharacteristicRecord::new(
                UART_RX_CHAR_UUID,
                CharacteristicProperties {
                    read: true,
                    notify: true,
                    ..CharacteristicProperties::default()
                },
            ))
    }

    /// Device Information service with read-only string characteristics.
    pub fn device_information(info: &DeviceInfo) -> Self {
        let fields = [
            (DIS_MANUFACTURER_NAME_UUID, &info.manufacturer),
            (DIS_MODEL_NUMBER_UUID, &info.model_number),
            (DIS_SERIAL_NUMBER_UUID, &info.serial_number),
            (DIS_HARDWARE_REVISION_UUID, &info.hardware_revision),
            (DIS_FIRMWARE_REVISION_UUID, &info.firmware_revision),
            (DIS_SOFTWARE_REVISION_UUID, &info.software_revision),
        ];
        fields.into_iter().fold(
            Self::new(DIS_SERVICE_UUID, "Device Information"),
            |service, (uuid, value)| {
                let mut record =
                    CharacteristicRecord::new(uuid, CharacteristicProperties::READ_ONLY);
                record.value = value.as_ref().map(|s| Bytes::from(s.clone().into_bytes()));
                service.with_characteristic(record)
            },
        )
    }

    /// Adds a characteristic, replacing one with the same UUID.
    pub fn with_characteristic(mut self, record: CharacteristicRecord) -> Self {
        self.characteristics.retain(|c| c.uuid != record.uuid);
        self.characteristics.push(record);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabled services stay in the server but are not registered or served.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        &self.characteristics
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicRecord> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }

    pub(crate) fn characteristic_mut(&mut self, uuid: Uuid) -> Option<&mut CharacteristicRecord> {
        self.characteristics.iter_mut().find(|c| c.uuid == uuid)
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ServiceObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) -> Option<Arc<dyn ServiceObserver>> {
        self.observer.take()
    }

    pub(crate) fn observer(&self) -> Option<&Arc<dyn ServiceObserver>> {
        self.observer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceInfo, PeripheralService};
    use gattlink_core::uuids::{
        DIS_MANUFACTURER_NAME_UUID, DIS_SERIAL_NUMBER_UUID, DIS_SERVICE_UUID, UART_RX_CHAR_UUID,
        UART_SERVICE_UUID, UART_TX_CHAR_UUID,
    };

    #[test]
    fn uart_service_layout() {
        let service = PeripheralService::uart();
        assert_eq!(service.uuid(), UART_SERVICE_UUID);
        assert!(service.is_enabled());

        let tx = service.characteristic(UART_TX_CHAR_UUID).expect("tx");
        assert!(tx.properties.writable());
        assert!(!tx.properties.readable());
        let rx = service.characteristic(UART_RX_CHAR_UUID).expect("rx");
        assert!(rx.properties.readable() && rx.properties.notifiable());
        assert!(!rx.properties.writable());
    }

    #[test]
    fn device_information_is_read_only() {
        let info = DeviceInfo {
            manufacturer: Some("Adafruit".into()),
            ..DeviceInfo::default()
        };
        let service = PeripheralService::device_information(&info);
        assert_eq!(service.uuid(), DIS_SERVICE_UUID);
        assert_eq!(service.characteristics().len(), 6);
        assert!(service
            .characteristics()
            .iter()
            .all(|c| c.properties.readable() && !c.properties.writable()));

        let manufacturer = service
            .characteristic(DIS_MANUFACTURER_NAME_UUID)
            .expect("manufacturer");
        assert_eq!(manufacturer.value.as_deref(), Some(&b"Adafruit"[..]));
        let serial = service
            .characteristic(DIS_SERIAL_NUMBER_UUID)
            .expect("serial");
        assert_eq!(serial.value, None);
    }
}

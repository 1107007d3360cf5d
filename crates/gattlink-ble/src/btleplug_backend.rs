use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    CharPropFlags, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_util::StreamExt;
use gattlink_core::uuids::UART_SERVICE_UUID;
use gattlink_core::{CharacteristicProperties, LinkError, PeerId, WriteMode, DEFAULT_MTU};
use gattlink_transport::{CharacteristicHandle, LinkEvent, LinkHealthSnapshot, RadioLink};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BtleplugLinkConfig {
    pub scan_interval: Duration,
    pub connect_timeout: Duration,
    /// Only connect to these addresses when non-empty.
    pub allowlist: Vec<String>,
    /// Write size assumed for the connection; btleplug does not report the
    /// negotiated MTU.
    pub mtu: usize,
}

impl Default for BtleplugLinkConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(6),
            allowlist: Vec::new(),
            mtu: DEFAULT_MTU,
        }
    }
}

#[derive(Debug, Error)]
pub enum BtleplugLinkError {
    #[error("bluetooth manager unavailable: {0}")]
    ManagerUnavailable(String),
    #[error("no bluetooth adapter found")]
    AdapterUnavailable,
    #[error("no uart peripheral found within {0:?}")]
    NotFound(Duration),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// [`RadioLink`] over one connected btleplug peripheral.
///
/// Notifications and connection changes are forwarded as [`LinkEvent`]s by a
/// background task that stops when the link is dropped.
#[derive(Debug)]
pub struct BtleplugLink {
    peripheral: Peripheral,
    peer: PeerId,
    mtu: usize,
    forwarder: Option<JoinHandle<()>>,
    health: Mutex<LinkHealthSnapshot>,
}

impl BtleplugLink {
    /// Scans for a peripheral advertising the UART service and connects to it.
    pub async fn connect(
        config: BtleplugLinkConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), BtleplugLinkError> {
        let manager = Manager::new()
            .await
            .map_err(|err| BtleplugLinkError::ManagerUnavailable(err.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|err| BtleplugLinkError::ManagerUnavailable(err.to_string()))?
            .into_iter()
            .next()
            .ok_or(BtleplugLinkError::AdapterUnavailable)?;

        let scan = scan_for_uart(&adapter, &config);
        let peripheral = tokio::time::timeout(config.connect_timeout, scan)
            .await
            .map_err(|_| BtleplugLinkError::NotFound(config.connect_timeout))?;
        let _ = adapter.stop_scan().await;

        peripheral
            .connect()
            .await
            .map_err(|err| BtleplugLinkError::Connect(err.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|err| BtleplugLinkError::Connect(err.to_string()))?;

        let peer = PeerId::new(peripheral.address().to_string());
        tracing::info!(%peer, "connected to uart peripheral");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(LinkEvent::Connected { peer: peer.clone() });
        let forwarder = tokio::spawn(forward_events(
            adapter,
            peripheral.clone(),
            peer.clone(),
            events_tx,
        ));

        Ok((
            Self {
                peripheral,
                peer,
                mtu: config.mtu,
                forwarder: Some(forwarder),
                health: Mutex::new(LinkHealthSnapshot::default()),
            },
            events_rx,
        ))
    }

    fn find(&self, uuid: Uuid, service_uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
    }

    fn resolve(&self, handle: &CharacteristicHandle) -> Result<Characteristic, LinkError> {
        self.find(handle.uuid, handle.service_uuid)
            .ok_or(LinkError::InvalidCharacteristic)
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

async fn scan_for_uart(adapter: &Adapter, config: &BtleplugLinkConfig) -> Peripheral {
    let filter = ScanFilter {
        services: vec![UART_SERVICE_UUID],
    };
    loop {
        let _ = adapter.start_scan(filter.clone()).await;
        tokio::time::sleep(config.scan_interval).await;

        for peripheral in adapter.peripherals().await.unwrap_or_default() {
            let addr = peripheral.address().to_string();
            if !config.allowlist.is_empty() && !config.allowlist.iter().any(|a| a == &addr) {
                continue;
            }
            let advertised = match peripheral.properties().await {
                Ok(Some(props)) => crate::protocol::is_uart_advertised(&props.services),
                _ => false,
            };
            if advertised {
                return peripheral;
            }
        }
    }
}

async fn forward_events(
    adapter: Adapter,
    peripheral: Peripheral,
    peer: PeerId,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut central = match adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "central event stream unavailable");
            return;
        }
    };
    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "notification stream unavailable");
            return;
        }
    };
    let id = peripheral.id();

    loop {
        tokio::select! {
            Some(notification) = notifications.next() => {
                let event = LinkEvent::Notification {
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Some(event) = central.next() => {
                let forwarded = match event {
                    CentralEvent::DeviceDisconnected(ref other) if *other == id => {
                        Some(LinkEvent::Disconnected { peer: peer.clone() })
                    }
                    CentralEvent::DeviceConnected(ref other) if *other == id => {
                        Some(LinkEvent::Connected { peer: peer.clone() })
                    }
                    _ => None,
                };
                if let Some(event) = forwarded {
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
            else => break,
        }
    }
}

fn properties_from_flags(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
    }
}

fn backend_error(err: btleplug::Error) -> LinkError {
    match err {
        btleplug::Error::NotConnected => LinkError::Disconnected,
        other => LinkError::Backend(other.to_string()),
    }
}

fn write_error(err: btleplug::Error) -> LinkError {
    match err {
        btleplug::Error::NotConnected => LinkError::Disconnected,
        other => LinkError::WriteFailed(other.to_string()),
    }
}

#[async_trait]
impl RadioLink for BtleplugLink {
    async fn discover_characteristic(
        &self,
        uuid: Uuid,
        service_uuid: Uuid,
    ) -> Result<CharacteristicHandle, LinkError> {
        let found = self
            .find(uuid, service_uuid)
            .ok_or(LinkError::InvalidCharacteristic)?;
        Ok(CharacteristicHandle::new(
            found.uuid,
            found.service_uuid,
            properties_from_flags(found.properties),
        ))
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError> {
        let target = self.resolve(characteristic)?;
        let write_type = match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::Unacknowledged => WriteType::WithoutResponse,
        };
        let result = self
            .peripheral
            .write(&target, data, write_type)
            .await
            .map_err(write_error);
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_write(&result);
        result
    }

    async fn set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), LinkError> {
        let target = self.resolve(characteristic)?;
        let result = if enabled {
            self.peripheral.subscribe(&target).await
        } else {
            self.peripheral.unsubscribe(&target).await
        };
        result.map_err(|err| {
            tracing::warn!(error = %err, enabled, "set notify failed");
            LinkError::EnableNotifyFailed
        })
    }

    async fn read_value(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Bytes>, LinkError> {
        let target = self.resolve(characteristic)?;
        let value = self.peripheral.read(&target).await.map_err(backend_error)?;
        Ok(Some(Bytes::from(value)))
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn peer_id(&self) -> Option<PeerId> {
        Some(self.peer.clone())
    }

    fn health_snapshot(&self) -> LinkHealthSnapshot {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

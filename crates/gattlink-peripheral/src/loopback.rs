use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use gattlink_core::{AttError, LinkError, PeerId, WriteMode, DEFAULT_MTU};
use gattlink_transport::{CharacteristicHandle, LinkEvent, LinkHealthSnapshot, RadioLink};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapter::{Advertisement, PeripheralAdapter};
use crate::att::{ReadRequest, WriteRequest};
use crate::server::{AdvertisingState, AttributeServer};
use crate::service::PeripheralService;

/// In-process peripheral adapter; notifications go to attached [`LoopbackLink`]s.
#[derive(Debug)]
pub struct LoopbackAdapter {
    powered_on: bool,
    centrals: HashMap<PeerId, mpsc::UnboundedSender<LinkEvent>>,
    services: Vec<Uuid>,
    advertisement: Option<Advertisement>,
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self {
            powered_on: true,
            centrals: HashMap::new(),
            services: Vec::new(),
            advertisement: None,
        }
    }
}

impl LoopbackAdapter {
    pub fn set_powered_on(&mut self, powered_on: bool) {
        self.powered_on = powered_on;
    }

    pub fn advertisement(&self) -> Option<&Advertisement> {
        self.advertisement.as_ref()
    }

    pub fn registered_services(&self) -> &[Uuid] {
        &self.services
    }

    pub fn is_attached(&self, peer: &PeerId) -> bool {
        self.centrals.contains_key(peer)
    }

    pub fn connected_peers(&self) -> usize {
        self.centrals.len()
    }

    fn attach(&mut self, peer: PeerId, events: mpsc::UnboundedSender<LinkEvent>) {
        self.centrals.insert(peer, events);
    }

    fn detach(&mut self, peer: &PeerId) -> bool {
        self.centrals.remove(peer).is_some()
    }
}

impl PeripheralAdapter for LoopbackAdapter {
    fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    fn add_service(&mut self, service: &PeripheralService) -> Result<(), LinkError> {
        self.services.push(service.uuid());
        Ok(())
    }

    fn remove_all_services(&mut self) {
        self.services.clear();
    }

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), LinkError> {
        self.advertisement = Some(advertisement.clone());
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.advertisement = None;
    }

    fn notify(&mut self, characteristic: Uuid, value: &Bytes, peers: &[PeerId]) -> bool {
        for peer in peers {
            let Some(events) = self.centrals.get(peer) else {
                continue;
            };
            let event = LinkEvent::Notification {
                characteristic,
                value: value.clone(),
            };
            if events.send(event).is_err() {
                tracing::debug!(%peer, "loopback central went away");
                self.centrals.remove(peer);
            }
        }
        true
    }
}

pub type SharedServer = Arc<Mutex<AttributeServer<LoopbackAdapter>>>;

/// Central-side [`RadioLink`] wired straight into an [`AttributeServer`].
///
/// Each write becomes a one-request write batch from this link's peer;
/// `set_notify` subscribes or unsubscribes. Dropping the link disconnects
/// the peer from the server.
#[derive(Debug)]
pub struct LoopbackLink {
    peer: PeerId,
    server: SharedServer,
    mtu: usize,
    health: Mutex<LinkHealthSnapshot>,
}

impl LoopbackLink {
    /// Connects `peer` to an advertising server.
    pub fn connect(
        server: SharedServer,
        peer: PeerId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), LinkError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut guard = lock(&server);
            if guard.state() != AdvertisingState::Advertising {
                return Err(LinkError::Backend("peripheral is not advertising".into()));
            }
            let _ = events_tx.send(LinkEvent::Connected { peer: peer.clone() });
            guard.adapter_mut().attach(peer.clone(), events_tx);
        }
        tracing::debug!(%peer, "loopback central connected");
        Ok((
            Self {
                peer,
                server,
                mtu: DEFAULT_MTU,
                health: Mutex::new(LinkHealthSnapshot::default()),
            },
            events_rx,
        ))
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(1);
        self
    }

    pub fn server(&self) -> &SharedServer {
        &self.server
    }

    fn attached(&self) -> Result<MutexGuard<'_, AttributeServer<LoopbackAdapter>>, LinkError> {
        let guard = lock(&self.server);
        if !guard.adapter().is_attached(&self.peer) {
            return Err(LinkError::Disconnected);
        }
        Ok(guard)
    }

    fn write_request(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError> {
        let result = self.write_request(characteristic, data, mode);
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_write(&result);
        result
    }
}

fn lock(server: &SharedServer) -> MutexGuard<'_, AttributeServer<LoopbackAdapter>> {
    server.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        let mut server = lock(&self.server);
        server.on_disconnect(&self.peer);
        server.adapter_mut().detach(&self.peer);
    }
}

#[async_trait]
impl RadioLink for LoopbackLink {
    async fn discover_characteristic(
        &self,
        uuid: Uuid,
        service_uuid: Uuid,
    ) -> Result<CharacteristicHandle, LinkError> {
        let server = self.attached()?;
        let record = server
            .service(service_uuid)
            .filter(|s| s.is_enabled())
            .and_then(|s| s.characteristic(uuid))
            .ok_or(LinkError::InvalidCharacteristic)?;
        Ok(CharacteristicHandle::new(
            uuid,
            service_uuid,
            record.properties,
        ))
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError> {
        let mut server = self.attached()?;
        let record = server
            .characteristic(characteristic.uuid)
            .ok_or(LinkError::InvalidCharacteristic)?;
        let permitted = match mode {
            WriteMode::Acknowledged => record.properties.write,
            WriteMode::Unacknowledged => record.properties.write_without_response,
        };
        if !permitted {
            return Err(AttError::WriteNotPermitted.into());
        }
        let request = WriteRequest::new(characteristic.uuid, 0, Bytes::copy_from_slice(data))
            .from_peer(self.peer.clone());
        server.handle_write_batch(&[request])?;
        Ok(())
    }

    async fn set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), LinkError> {
        let mut server = self.attached()?;
        let result = if enabled {
            server.on_subscribe(characteristic.uuid, self.peer.clone())
        } else {
            server.on_unsubscribe(characteristic.uuid, &self.peer)
        };
        result.map(|_| ()).map_err(|err| {
            tracing::warn!(error = %err, enabled, "loopback set notify rejected");
            LinkError::EnableNotifyFailed
        })
    }

    async fn read_value(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Bytes>, LinkError> {
        let server = self.attached()?;
        let request = ReadRequest::new(characteristic.uuid, 0).from_peer(self.peer.clone());
        Ok(Some(server.handle_read(&request)?))
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

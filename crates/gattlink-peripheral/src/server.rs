use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use gattlink_core::uuids::UART_SERVICE_UUID;
use gattlink_core::{AttError, LinkError, PeerId};
use uuid::Uuid;

use crate::adapter::{Advertisement, PeripheralAdapter};
use crate::att::{ReadRequest, WriteRequest, MAX_ATTRIBUTE_LEN};
use crate::service::{CharacteristicRecord, PeripheralService, ServiceObserver};
use crate::subscriptions::SubscriptionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingState {
    Idle,
    Advertising,
}

#[derive(Debug, Clone)]
struct PendingNotification {
    characteristic: Uuid,
    value: Bytes,
    peers: Vec<PeerId>,
}

/// Peripheral-role attribute server.
///
/// Owns the service table, answers ATT reads and write batches, tracks
/// subscribers and drives advertising through `A`. All methods take
/// `&mut self`; callers serving several radio callbacks wrap the server in a
/// mutex so each request is handled as one unit.
#[derive(Debug)]
pub struct AttributeServer<A> {
    adapter: A,
    services: Vec<PeripheralService>,
    subscriptions: SubscriptionRegistry,
    state: AdvertisingState,
    start_pending: bool,
    local_name: Option<String>,
    pending: VecDeque<PendingNotification>,
}

impl<A: PeripheralAdapter> AttributeServer<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            services: Vec::new(),
            subscriptions: SubscriptionRegistry::default(),
            state: AdvertisingState::Idle,
            start_pending: false,
            local_name: None,
            pending: VecDeque::new(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    pub fn is_start_pending(&self) -> bool {
        self.start_pending
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Adds a service, returning the one it replaced with the same UUID.
    ///
    /// Takes effect on the radio at the next `start_advertising`.
    pub fn add_service(&mut self, service: PeripheralService) -> Option<PeripheralService> {
        let replaced = self.remove_service(service.uuid());
        self.services.push(service);
        replaced
    }

    pub fn remove_service(&mut self, uuid: Uuid) -> Option<PeripheralService> {
        let index = self.services.iter().position(|s| s.uuid() == uuid)?;
        Some(self.services.remove(index))
    }

    pub fn remove_all_services(&mut self) {
        self.services.clear();
    }

    pub fn services(&self) -> &[PeripheralService] {
        &self.services
    }

    pub fn service(&self, uuid: Uuid) -> Option<&PeripheralService> {
        self.services.iter().find(|s| s.uuid() == uuid)
    }

    pub fn service_mut(&mut self, uuid: Uuid) -> Option<&mut PeripheralService> {
        self.services.iter_mut().find(|s| s.uuid() == uuid)
    }

    /// Registers `observer` on a service. Returns false when the service is unknown.
    pub fn set_observer(&mut self, service: Uuid, observer: Arc<dyn ServiceObserver>) -> bool {
        match self.service_mut(service) {
            Some(s) => {
                s.set_observer(observer);
                true
            }
            None => false,
        }
    }

    pub fn clear_observer(&mut self, service: Uuid) -> Option<Arc<dyn ServiceObserver>> {
        self.service_mut(service)?.clear_observer()
    }

    /// Characteristic lookup across enabled services.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicRecord> {
        let index = self.locate(uuid)?;
        self.services[index].characteristic(uuid)
    }

    fn locate(&self, characteristic: Uuid) -> Option<usize> {
        self.services
            .iter()
            .position(|s| s.is_enabled() && s.characteristic(characteristic).is_some())
    }

    /// Starts advertising, or latches the request until the radio powers on.
    pub fn start_advertising(&mut self, local_name: Option<String>) -> Result<(), LinkError> {
        self.local_name = local_name;
        if !self.adapter.is_powered_on() {
            tracing::info!("radio not powered on; advertising deferred");
            self.start_pending = true;
            return Ok(());
        }
        self.begin_advertising()
    }

    fn begin_advertising(&mut self) -> Result<(), LinkError> {
        self.start_pending = false;
        if self.state == AdvertisingState::Advertising {
            self.adapter.stop_advertising();
            self.state = AdvertisingState::Idle;
        }
        self.adapter.remove_all_services();

        let mut advertisement = Advertisement {
            local_name: self.local_name.clone(),
            service_uuids: Vec::new(),
        };
        for service in self.services.iter().filter(|s| s.is_enabled()) {
            if let Err(err) = self.adapter.add_service(service) {
                tracing::warn!(service = %service.uuid(), error = %err, "add service failed");
                self.adapter.remove_all_services();
                return Err(err);
            }
            if service.uuid() == UART_SERVICE_UUID {
                advertisement.service_uuids.push(UART_SERVICE_UUID);
            }
        }

        if let Err(err) = self.adapter.start_advertising(&advertisement) {
            tracing::warn!(error = %err, "start advertising failed");
            self.adapter.remove_all_services();
            return Err(err);
        }
        self.state = AdvertisingState::Advertising;
        tracing::info!(
            local_name = ?advertisement.local_name,
            services = advertisement.service_uuids.len(),
            "advertising started"
        );
        Ok(())
    }

    /// Stops advertising, unregisters all services and drops a latched start.
    pub fn stop_advertising(&mut self) {
        self.start_pending = false;
        if self.state == AdvertisingState::Advertising {
            self.adapter.stop_advertising();
            self.state = AdvertisingState::Idle;
            tracing::info!("advertising stopped");
        }
        self.adapter.remove_all_services();
    }

    /// Radio power transitions reported by the stack.
    ///
    /// Powering on honours a latched start. Powering off while advertising
    /// latches a restart; every central is gone so subscriptions are dropped.
    pub fn on_power_state_changed(&mut self, powered_on: bool) -> Result<(), LinkError> {
        if powered_on {
            if self.start_pending {
                return self.begin_advertising();
            }
            return Ok(());
        }
        if self.state == AdvertisingState::Advertising {
            tracing::info!("radio powered off while advertising");
            self.state = AdvertisingState::Idle;
            self.start_pending = true;
        }
        self.subscriptions.clear();
        self.pending.clear();
        Ok(())
    }

    pub fn handle_read(&self, request: &ReadRequest) -> Result<Bytes, AttError> {
        let Some(record) = self.characteristic(request.characteristic) else {
            tracing::debug!(
                characteristic = %request.characteristic,
                "read of unknown characteristic"
            );
            return Err(AttError::ReadNotPermitted);
        };
        if !record.properties.readable() {
            return Err(AttError::ReadNotPermitted);
        }
        let Some(value) = record.value.as_ref() else {
            return Ok(Bytes::new());
        };
        if request.offset > value.len() {
            tracing::debug!(
                characteristic = %request.characteristic,
                offset = request.offset,
                len = value.len(),
                "read offset out of range"
            );
            return Err(AttError::InvalidOffset);
        }
        Ok(value.slice(request.offset..))
    }

    /// Applies a batch of writes, all or nothing.
    ///
    /// Every request must target a known writable characteristic; otherwise
    /// the whole batch is rejected with `WriteNotPermitted` and no value
    /// changes. A write ending past [`MAX_ATTRIBUTE_LEN`] rejects the batch
    /// with `InvalidOffset`. Each write zero-extends the stored value as needed and
    /// splices its bytes at `offset`.
    pub fn handle_write_batch(&mut self, requests: &[WriteRequest]) -> Result<(), AttError> {
        let mut targets = Vec::with_capacity(requests.len());
        for request in requests {
            let writable = self
                .characteristic(request.characteristic)
                .is_some_and(|record| record.properties.writable());
            if !writable {
                tracing::warn!(
                    characteristic = %request.characteristic,
                    batch = requests.len(),
                    "write batch rejected"
                );
                return Err(AttError::WriteNotPermitted);
            }
            let end = request.offset.checked_add(request.value.len());
            if end.map_or(true, |end| end > MAX_ATTRIBUTE_LEN) {
                tracing::warn!(
                    characteristic = %request.characteristic,
                    offset = request.offset,
                    len = request.value.len(),
                    "write past attribute bound rejected"
                );
                return Err(AttError::InvalidOffset);
            }
            if let Some(index) = self.locate(request.characteristic) {
                targets.push(index);
            }
        }

        let mut notices = Vec::new();
        for (request, index) in requests.iter().zip(targets) {
            let service = &mut self.services[index];
            let service_uuid = service.uuid();
            let observer = service.observer().cloned();
            if let Some(record) = service.characteristic_mut(request.characteristic) {
                let spliced = splice(record.value.as_deref(), request.offset, &request.value);
                record.value = Some(spliced);
            }
            tracing::trace!(
                characteristic = %request.characteristic,
                offset = request.offset,
                bytes = %hex::encode(&request.value),
                "write applied"
            );
            if let Some(observer) = observer {
                notices.push((observer, service_uuid, request));
            }
        }
        for (observer, service_uuid, request) in notices {
            observer.on_write(
                service_uuid,
                request.characteristic,
                request.peer.as_ref(),
                &request.value,
            );
        }
        Ok(())
    }

    /// Subscribes `peer` to notifications. Returns true when newly subscribed.
    pub fn on_subscribe(&mut self, characteristic: Uuid, peer: PeerId) -> Result<bool, AttError> {
        self.check_notifiable(characteristic)?;
        let added = self.subscriptions.subscribe(characteristic, peer.clone());
        if added {
            tracing::debug!(%peer, %characteristic, "central subscribed");
            self.notify_subscription(characteristic, &peer, true);
        }
        Ok(added)
    }

    /// Unsubscribes `peer`. Returns true when it was subscribed.
    pub fn on_unsubscribe(
        &mut self,
        characteristic: Uuid,
        peer: &PeerId,
    ) -> Result<bool, AttError> {
        self.check_notifiable(characteristic)?;
        let removed = self.subscriptions.unsubscribe(characteristic, peer);
        if removed {
            tracing::debug!(%peer, %characteristic, "central unsubscribed");
            self.notify_subscription(characteristic, peer, false);
        }
        Ok(removed)
    }

    /// Forgets a disconnected central; returns the characteristics it was subscribed to.
    pub fn on_disconnect(&mut self, peer: &PeerId) -> Vec<Uuid> {
        let left = self.subscriptions.remove_peer(peer);
        for characteristic in &left {
            self.notify_subscription(*characteristic, peer, false);
        }
        for pending in &mut self.pending {
            pending.peers.retain(|p| p != peer);
        }
        self.pending.retain(|p| !p.peers.is_empty());
        tracing::debug!(%peer, subscriptions = left.len(), "central disconnected");
        left
    }

    fn check_notifiable(&self, characteristic: Uuid) -> Result<(), AttError> {
        let record = self
            .characteristic(characteristic)
            .ok_or(AttError::InvalidHandle)?;
        if !record.properties.notifiable() {
            return Err(AttError::WriteNotPermitted);
        }
        Ok(())
    }

    fn notify_subscription(&self, characteristic: Uuid, peer: &PeerId, subscribed: bool) {
        let Some(index) = self.locate(characteristic) else {
            return;
        };
        let service = &self.services[index];
        if let Some(observer) = service.observer() {
            observer.on_subscription_changed(service.uuid(), characteristic, peer, subscribed);
        }
    }

    /// Stores a new value and notifies exactly the current subscribers.
    ///
    /// Returns the peers the notification is addressed to. When the stack's
    /// queue is full the notification is held and sent by
    /// [`Self::on_ready_to_update_subscribers`].
    pub fn push_value(
        &mut self,
        characteristic: Uuid,
        value: impl Into<Bytes>,
    ) -> Result<Vec<PeerId>, AttError> {
        let value = value.into();
        let index = self.locate(characteristic).ok_or(AttError::InvalidHandle)?;
        if let Some(record) = self.services[index].characteristic_mut(characteristic) {
            record.value = Some(value.clone());
        }

        let mut peers: Vec<PeerId> = self
            .subscriptions
            .subscribers_of(characteristic)
            .into_iter()
            .collect();
        if peers.is_empty() {
            return Ok(peers);
        }
        peers.sort();

        let queued_behind = !self.pending.is_empty();
        if queued_behind || !self.adapter.notify(characteristic, &value, &peers) {
            tracing::debug!(
                %characteristic,
                queued = self.pending.len() + 1,
                "notification queued"
            );
            self.pending.push_back(PendingNotification {
                characteristic,
                value,
                peers: peers.clone(),
            });
        }
        Ok(peers)
    }

    /// Retries held notifications in order; returns how many were sent.
    pub fn on_ready_to_update_subscribers(&mut self) -> usize {
        let mut sent = 0;
        while let Some(next) = self.pending.front() {
            if !self
                .adapter
                .notify(next.characteristic, &next.value, &next.peers)
            {
                break;
            }
            self.pending.pop_front();
            sent += 1;
        }
        sent
    }

    pub fn pending_notifications(&self) -> usize {
        self.pending.len()
    }
}

fn splice(existing: Option<&[u8]>, offset: usize, bytes: &[u8]) -> Bytes {
    let mut buf = existing.map(<[u8]>::to_vec).unwrap_or_default();
    let end = offset + bytes.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(bytes);
    Bytes::from(buf)
}

#[cfg(test)]
mod tests {
    use super::{AdvertisingState, AttributeServer};
    use crate::adapter::MockPeripheralAdapter;
    use crate::att::{ReadRequest, WriteRequest, MAX_ATTRIBUTE_LEN};
    use crate::service::{CharacteristicRecord, DeviceInfo, PeripheralService, ServiceObserver};
    use bytes::Bytes;
    use gattlink_core::uuids::{
        uuid16, DIS_MANUFACTURER_NAME_UUID, DIS_SERVICE_UUID, UART_RX_CHAR_UUID,
        UART_SERVICE_UUID, UART_TX_CHAR_UUID,
    };
    use gattlink_core::{AttError, CharacteristicProperties, PeerId};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    const SENSOR_SERVICE: Uuid = uuid16(0xFFF0);
    const SENSOR_VALUE: Uuid = uuid16(0xFFF1);

    fn sensor_service() -> PeripheralService {
        PeripheralService::new(SENSOR_SERVICE, "sensor").with_characteristic(
            CharacteristicRecord::new(
                SENSOR_VALUE,
                CharacteristicProperties {
                    read: true,
                    write: true,
                    notify: true,
                    ..CharacteristicProperties::default()
                },
            ),
        )
    }

    fn server() -> AttributeServer<MockPeripheralAdapter> {
        let mut server = AttributeServer::new(MockPeripheralAdapter::default());
        server.add_service(PeripheralService::uart());
        server.add_service(sensor_service());
        server
    }

    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
        subscriptions: Mutex<Vec<(Uuid, PeerId, bool)>>,
    }

    impl ServiceObserver for Recorder {
        fn on_write(
            &self,
            _service: Uuid,
            characteristic: Uuid,
            _peer: Option<&PeerId>,
            written: &[u8],
        ) {
            self.writes
                .lock()
                .expect("writes")
                .push((characteristic, written.to_vec()));
        }

        fn on_subscription_changed(
            &self,
            _service: Uuid,
            characteristic: Uuid,
            peer: &PeerId,
            subscribed: bool,
        ) {
            self.subscriptions.lock().expect("subscriptions").push((
                characteristic,
                peer.clone(),
                subscribed,
            ));
        }
    }

    #[test]
    fn read_returns_slice_from_offset() {
        let mut server = server();
        server.push_value(SENSOR_VALUE, vec![1_u8, 2, 3, 4]).expect("push");

        let read = server
            .handle_read(&ReadRequest::new(SENSOR_VALUE, 1))
            .expect("read");
        assert_eq!(read.as_ref(), &[2, 3, 4]);
        let at_end = server
            .handle_read(&ReadRequest::new(SENSOR_VALUE, 4))
            .expect("read at end");
        assert!(at_end.is_empty());
        assert_eq!(
            server.handle_read(&ReadRequest::new(SENSOR_VALUE, 5)),
            Err(AttError::InvalidOffset)
        );
    }

    #[test]
    fn read_of_unset_value_is_empty() {
        let server = server();
        let read = server
            .handle_read(&ReadRequest::new(UART_RX_CHAR_UUID, 0))
            .expect("read");
        assert!(read.is_empty());
    }

    #[test]
    fn read_rejects_unknown_and_write_only() {
        let server = server();
        assert_eq!(
            server.handle_read(&ReadRequest::new(uuid16(0x1234), 0)),
            Err(AttError::ReadNotPermitted)
        );
        assert_eq!(
            server.handle_read(&ReadRequest::new(UART_TX_CHAR_UUID, 0)),
            Err(AttError::ReadNotPermitted)
        );
    }

    #[test]
    fn write_zero_extends_and_splices() {
        let mut server = server();
        server
            .handle_write_batch(&[WriteRequest::new(SENSOR_VALUE, 2, vec![0xaa_u8, 0xbb])])
            .expect("write");
        assert_eq!(
            server.characteristic(SENSOR_VALUE).and_then(|c| c.value.clone()),
            Some(Bytes::from_static(&[0, 0, 0xaa, 0xbb]))
        );

        server
            .handle_write_batch(&[
                WriteRequest::new(SENSOR_VALUE, 0, vec![0x01_u8]),
                WriteRequest::new(SENSOR_VALUE, 3, vec![0x02_u8, 0x03]),
            ])
            .expect("batch");
        assert_eq!(
            server.characteristic(SENSOR_VALUE).and_then(|c| c.value.clone()),
            Some(Bytes::from_static(&[0x01, 0, 0xaa, 0x02, 0x03]))
        );
    }

    #[test]
    fn batch_with_read_only_target_changes_nothing() {
        let mut server = server();
        server.add_service(PeripheralService::device_information(&DeviceInfo {
            manufacturer: Some("acme".into()),
            ..DeviceInfo::default()
        }));
        server.push_value(SENSOR_VALUE, vec![9_u8; 3]).expect("push");

        let result = server.handle_write_batch(&[
            WriteRequest::new(SENSOR_VALUE, 0, vec![1_u8]),
            WriteRequest::new(DIS_MANUFACTURER_NAME_UUID, 0, b"evil".to_vec()),
        ]);
        assert_eq!(result, Err(AttError::WriteNotPermitted));
        assert_eq!(
            server.characteristic(SENSOR_VALUE).and_then(|c| c.value.clone()),
            Some(Bytes::from_static(&[9, 9, 9]))
        );
        assert_eq!(
            server
                .characteristic(DIS_MANUFACTURER_NAME_UUID)
                .and_then(|c| c.value.clone()),
            Some(Bytes::from_static(b"acme"))
        );
    }

    #[test]
    fn write_past_attribute_bound_is_rejected_whole() {
        let mut server = server();
        server.push_value(SENSOR_VALUE, vec![7_u8; 2]).expect("push");

        for offset in [usize::MAX - 1, 1 << 40, MAX_ATTRIBUTE_LEN] {
            let result = server.handle_write_batch(&[
                WriteRequest::new(SENSOR_VALUE, 0, vec![1_u8]),
                WriteRequest::new(SENSOR_VALUE, offset, vec![1_u8]),
            ]);
            assert_eq!(result, Err(AttError::InvalidOffset), "offset {offset}");
        }
        assert_eq!(
            server.characteristic(SENSOR_VALUE).and_then(|c| c.value.clone()),
            Some(Bytes::from_static(&[7, 7]))
        );

        server
            .handle_write_batch(&[WriteRequest::new(
                SENSOR_VALUE,
                MAX_ATTRIBUTE_LEN - 1,
                vec![1_u8],
            )])
            .expect("last byte fits");
        let value = server.characteristic(SENSOR_VALUE).and_then(|c| c.value.clone());
        assert_eq!(value.map(|v| v.len()), Some(MAX_ATTRIBUTE_LEN));
    }

    #[test]
    fn disabled_service_is_not_served() {
        let mut server = server();
        server
            .service_mut(SENSOR_SERVICE)
            .expect("sensor")
            .set_enabled(false);
        assert_eq!(
            server.handle_read(&ReadRequest::new(SENSOR_VALUE, 0)),
            Err(AttError::ReadNotPermitted)
        );
        assert_eq!(
            server.handle_write_batch(&[WriteRequest::new(SENSOR_VALUE, 0, vec![1_u8])]),
            Err(AttError::WriteNotPermitted)
        );
    }

    #[test]
    fn observer_sees_applied_writes_only() {
        let mut server = server();
        let recorder = Arc::new(Recorder::default());
        assert!(server.set_observer(UART_SERVICE_UUID, recorder.clone()));

        server
            .handle_write_batch(&[WriteRequest::new(UART_TX_CHAR_UUID, 0, b"hi".to_vec())])
            .expect("write");
        let _ = server.handle_write_batch(&[
            WriteRequest::new(UART_TX_CHAR_UUID, 0, b"no".to_vec()),
            WriteRequest::new(UART_RX_CHAR_UUID, 0, b"no".to_vec()),
        ]);
        assert_eq!(
            *recorder.writes.lock().expect("writes"),
            vec![(UART_TX_CHAR_UUID, b"hi".to_vec())]
        );

        assert!(server.clear_observer(UART_SERVICE_UUID).is_some());
        server
            .handle_write_batch(&[WriteRequest::new(UART_TX_CHAR_UUID, 0, b"x".to_vec())])
            .expect("write");
        assert_eq!(recorder.writes.lock().expect("writes").len(), 1);
    }

    #[test]
    fn subscribe_requires_notifiable_characteristic() {
        let mut server = server();
        let p1 = PeerId::from("p1");
        assert_eq!(
            server.on_subscribe(uuid16(0x1234), p1.clone()),
            Err(AttError::InvalidHandle)
        );
        assert_eq!(
            server.on_subscribe(UART_TX_CHAR_UUID, p1.clone()),
            Err(AttError::WriteNotPermitted)
        );
        assert_eq!(server.on_subscribe(UART_RX_CHAR_UUID, p1.clone()), Ok(true));
        assert_eq!(server.on_subscribe(UART_RX_CHAR_UUID, p1.clone()), Ok(false));
        assert_eq!(server.on_unsubscribe(UART_RX_CHAR_UUID, &p1), Ok(true));
        assert_eq!(server.on_unsubscribe(UART_RX_CHAR_UUID, &p1), Ok(false));
    }

    #[test]
    fn push_notifies_only_subscribers_of_that_characteristic() {
        let mut server = server();
        server
            .on_subscribe(UART_RX_CHAR_UUID, PeerId::from("p1"))
            .expect("subscribe");

        let peers = server
            .push_value(UART_RX_CHAR_UUID, vec![0x01_u8, 0x02])
            .expect("push");
        assert_eq!(peers, vec![PeerId::from("p1")]);
        assert!(server
            .push_value(SENSOR_VALUE, vec![0x03_u8])
            .expect("push")
            .is_empty());

        let sent = server.adapter().notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, UART_RX_CHAR_UUID);
        assert_eq!(sent[0].1.as_ref(), &[0x01, 0x02]);
        assert_eq!(sent[0].2, vec![PeerId::from("p1")]);
    }

    #[test]
    fn push_to_unknown_characteristic_is_rejected() {
        let mut server = server();
        assert_eq!(
            server.push_value(uuid16(0x1234), vec![1_u8]),
            Err(AttError::InvalidHandle)
        );
    }

    #[test]
    fn full_queue_holds_notifications_in_order() {
        let mut server = server();
        server.adapter_mut().set_notify_capacity(1);
        server
            .on_subscribe(UART_RX_CHAR_UUID, PeerId::from("p1"))
            .expect("subscribe");

        for byte in 1_u8..=3 {
            server.push_value(UART_RX_CHAR_UUID, vec![byte]).expect("push");
        }
        assert_eq!(server.pending_notifications(), 2);
        assert_eq!(server.on_ready_to_update_subscribers(), 0);

        server.adapter_mut().take_notifications();
        server.adapter_mut().set_notify_capacity(usize::MAX);
        assert_eq!(server.on_ready_to_update_subscribers(), 2);
        let values: Vec<u8> = server
            .adapter()
            .notifications()
            .iter()
            .map(|(_, value, _)| value[0])
            .collect();
        assert_eq!(values, vec![2, 3]);
        assert_eq!(server.pending_notifications(), 0);
    }

    #[test]
    fn disconnect_drops_subscriptions_and_reports_them() {
        let mut server = server();
        let recorder = Arc::new(Recorder::default());
        server.set_observer(UART_SERVICE_UUID, recorder.clone());
        let p1 = PeerId::from("p1");
        server.on_subscribe(UART_RX_CHAR_UUID, p1.clone()).expect("rx");
        server.on_subscribe(SENSOR_VALUE, p1.clone()).expect("sensor");

        let mut left = server.on_disconnect(&p1);
        left.sort();
        let mut expected = vec![UART_RX_CHAR_UUID, SENSOR_VALUE];
        expected.sort();
        assert_eq!(left, expected);
        assert!(server
            .push_value(UART_RX_CHAR_UUID, vec![1_u8])
            .expect("push")
            .is_empty());
        assert_eq!(
            *recorder.subscriptions.lock().expect("subscriptions"),
            vec![
                (UART_RX_CHAR_UUID, p1.clone(), true),
                (UART_RX_CHAR_UUID, p1, false),
            ]
        );
    }

    #[test]
    fn advertisement_includes_uart_uuid_when_enabled() {
        let mut server = server();
        server.add_service(PeripheralService::device_information(&DeviceInfo::default()));
        server
            .start_advertising(Some("gattlink".into()))
            .expect("advertise");

        assert_eq!(server.state(), AdvertisingState::Advertising);
        let advertisement = server.adapter().advertisement().expect("advertisement");
        assert_eq!(advertisement.local_name.as_deref(), Some("gattlink"));
        assert_eq!(advertisement.service_uuids, vec![UART_SERVICE_UUID]);
        assert_eq!(
            server.adapter().registered_services(),
            &[UART_SERVICE_UUID, SENSOR_SERVICE, DIS_SERVICE_UUID]
        );

        server
            .service_mut(UART_SERVICE_UUID)
            .expect("uart")
            .set_enabled(false);
        server.start_advertising(None).expect("re-advertise");
        let advertisement = server.adapter().advertisement().expect("advertisement");
        assert!(advertisement.service_uuids.is_empty());
        assert_eq!(advertisement.local_name, None);
        assert_eq!(
            server.adapter().registered_services(),
            &[SENSOR_SERVICE, DIS_SERVICE_UUID]
        );
    }

    #[test]
    fn start_before_power_on_is_latched() {
        let mut server = AttributeServer::new(MockPeripheralAdapter::powered_off());
        server.add_service(PeripheralService::uart());
        server.start_advertising(Some("late".into())).expect("latched");
        assert!(server.is_start_pending());
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert_eq!(server.adapter().advertise_calls(), 0);

        server.adapter_mut().set_powered_on(true);
        server.on_power_state_changed(true).expect("power on");
        assert!(!server.is_start_pending());
        assert_eq!(server.state(), AdvertisingState::Advertising);
        assert_eq!(
            server
                .adapter()
                .advertisement()
                .and_then(|a| a.local_name.as_deref()),
            Some("late")
        );
    }

    #[test]
    fn stop_clears_latched_start() {
        let mut server = AttributeServer::new(MockPeripheralAdapter::powered_off());
        server.add_service(PeripheralService::uart());
        server.start_advertising(None).expect("latched");
        server.stop_advertising();
        assert!(!server.is_start_pending());

        server.adapter_mut().set_powered_on(true);
        server.on_power_state_changed(true).expect("power on");
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert_eq!(server.adapter().advertise_calls(), 0);
    }

    #[test]
    fn stop_unregisters_services() {
        let mut server = server();
        server.start_advertising(None).expect("advertise");
        server.stop_advertising();
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert!(server.adapter().registered_services().is_empty());
        assert!(server.adapter().advertisement().is_none());
    }

    #[test]
    fn power_loss_while_advertising_restarts_on_power_on() {
        let mut server = server();
        server.start_advertising(None).expect("advertise");
        server
            .on_subscribe(UART_RX_CHAR_UUID, PeerId::from("p1"))
            .expect("subscribe");

        server.adapter_mut().set_powered_on(false);
        server.on_power_state_changed(false).expect("power off");
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert!(server.is_start_pending());
        assert!(server.subscriptions().subscribers_of(UART_RX_CHAR_UUID).is_empty());

        server.adapter_mut().set_powered_on(true);
        server.on_power_state_changed(true).expect("power on");
        assert_eq!(server.state(), AdvertisingState::Advertising);
        assert_eq!(server.adapter().advertise_calls(), 2);
    }

    #[test]
    fn failed_advertising_leaves_server_idle() {
        let mut server = server();
        server.adapter_mut().set_fail_advertising(true);
        assert!(server.start_advertising(None).is_err());
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert!(server.adapter().registered_services().is_empty());
    }

    #[test]
    fn rejected_service_unregisters_earlier_ones() {
        let mut server = server();
        server.adapter_mut().set_reject_service(Some(SENSOR_SERVICE));
        assert!(server.start_advertising(Some("rig".into())).is_err());
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert!(server.adapter().registered_services().is_empty());
        assert_eq!(server.adapter().advertise_calls(), 0);

        server.adapter_mut().set_reject_service(None);
        server.start_advertising(Some("rig".into())).expect("advertise");
        assert_eq!(
            server.adapter().registered_services(),
            &[UART_SERVICE_UUID, SENSOR_SERVICE]
        );
    }

    #[test]
    fn add_service_replaces_same_uuid() {
        let mut server = server();
        assert!(server.add_service(PeripheralService::uart()).is_some());
        assert_eq!(server.services().len(), 2);
        assert!(server.remove_service(SENSOR_SERVICE).is_some());
        assert!(server.remove_service(SENSOR_SERVICE).is_none());
        server.remove_all_services();
        assert!(server.services().is_empty());
    }
}

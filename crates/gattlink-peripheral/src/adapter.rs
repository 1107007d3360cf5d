use bytes::Bytes;
use gattlink_core::{LinkError, PeerId};
use uuid::Uuid;

use crate::service::PeripheralService;

/// Advertisement payload handed to the radio stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
}

/// Peripheral-role radio stack consumed by [`crate::AttributeServer`].
pub trait PeripheralAdapter {
    /// Whether the radio currently reports powered-on.
    fn is_powered_on(&self) -> bool;

    /// Registers one service and its characteristics.
    fn add_service(&mut self, service: &PeripheralService) -> Result<(), LinkError>;

    fn remove_all_services(&mut self);

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), LinkError>;

    fn stop_advertising(&mut self);

    /// Queues a notification of `value` to `peers`.
    ///
    /// Returns false when the stack's transmit queue is full; the caller
    /// retries once the stack reports it is ready again.
    fn notify(&mut self, characteristic: Uuid, value: &Bytes, peers: &[PeerId]) -> bool;
}

/// In-memory adapter for tests.
#[derive(Debug, Clone)]
pub struct MockPeripheralAdapter {
    powered_on: bool,
    services: Vec<Uuid>,
    advertisement: Option<Advertisement>,
    notifications: Vec<(Uuid, Bytes, Vec<PeerId>)>,
    notify_capacity: usize,
    advertise_calls: u64,
    fail_advertising: bool,
    reject_service: Option<Uuid>,
}

impl Default for MockPeripheralAdapter {
    fn default() -> Self {
        Self {
            powered_on: true,
            services: Vec::new(),
            advertisement: None,
            notifications: Vec::new(),
            notify_capacity: usize::MAX,
            advertise_calls: 0,
            fail_advertising: false,
            reject_service: None,
        }
    }
}

impl MockPeripheralAdapter {
    /// Adapter that reports powered-off until [`Self::set_powered_on`] is called.
    pub fn powered_off() -> Self {
        Self {
            powered_on: false,
            ..Self::default()
        }
    }

    pub fn set_powered_on(&mut self, powered_on: bool) {
        self.powered_on = powered_on;
    }

    /// Caps the number of notifications accepted before `notify` reports a full queue.
    pub fn set_notify_capacity(&mut self, capacity: usize) {
        self.notify_capacity = capacity;
    }

    pub fn set_fail_advertising(&mut self, fail: bool) {
        self.fail_advertising = fail;
    }

    /// `add_service` fails for the service with this UUID.
    pub fn set_reject_service(&mut self, uuid: Option<Uuid>) {
        self.reject_service = uuid;
    }

    /// UUIDs of the services currently registered.
    pub fn registered_services(&self) -> &[Uuid] {
        &self.services
    }

    pub fn advertisement(&self) -> Option<&Advertisement> {
        self.advertisement.as_ref()
    }

    pub fn advertise_calls(&self) -> u64 {
        self.advertise_calls
    }

    pub fn notifications(&self) -> &[(Uuid, Bytes, Vec<PeerId>)] {
        &self.notifications
    }

    /// Drains recorded notifications and frees the queue.
    pub fn take_notifications(&mut self) -> Vec<(Uuid, Bytes, Vec<PeerId>)> {
        std::mem::take(&mut self.notifications)
    }
}

impl PeripheralAdapter for MockPeripheralAdapter {
    fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    fn add_service(&mut self, service: &PeripheralService) -> Result<(), LinkError> {
        if !self.powered_on {
            return Err(LinkError::Backend("adapter powered off".into()));
        }
        if self.reject_service == Some(service.uuid()) {
            return Err(LinkError::Backend(format!("service {} rejected", service.uuid())));
        }
        self.services.push(service.uuid());
        Ok(())
    }

    fn remove_all_services(&mut self) {
        self.services.clear();
    }

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), LinkError> {
        self.advertise_calls += 1;
        if self.fail_advertising {
            return Err(LinkError::Backend("advertising rejected".into()));
        }
        self.advertisement = Some(advertisement.clone());
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.advertisement = None;
    }

    fn notify(&mut self, characteristic: Uuid, value: &Bytes, peers: &[PeerId]) -> bool {
        if self.notifications.len() >= self.notify_capacity {
            return false;
        }
        self.notifications
            .push((characteristic, value.clone(), peers.to_vec()));
        true
    }
}

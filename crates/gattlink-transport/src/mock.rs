use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gattlink_core::uuids::{UART_RX_CHAR_UUID, UART_SERVICE_UUID, UART_TX_CHAR_UUID};
use gattlink_core::{CharacteristicProperties, LinkError, PeerId, WriteMode, DEFAULT_MTU};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::link::{CharacteristicHandle, LinkEvent, LinkHealthSnapshot, RadioLink};

/// One successful write captured by [`MockRadioLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub mode: WriteMode,
}

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<RecordedWrite>,
    write_attempts: usize,
    notify: HashMap<Uuid, bool>,
    values: HashMap<Uuid, Bytes>,
    health: LinkHealthSnapshot,
}

/// In-memory radio link for tests and simulations.
///
/// Records every write, can inject failures at given write indices, delay
/// write completion, and emit scripted notifications once a number of
/// writes has been attempted.
#[derive(Debug)]
pub struct MockRadioLink {
    characteristics: Vec<CharacteristicHandle>,
    mtu: usize,
    peer: Option<PeerId>,
    fail_writes: HashSet<usize>,
    write_delay: Option<Duration>,
    reject_notify: bool,
    replies: Vec<(usize, Uuid, Bytes)>,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockRadioLink {
    fn default() -> Self {
        Self {
            characteristics: Vec::new(),
            mtu: DEFAULT_MTU,
            peer: None,
            fail_writes: HashSet::new(),
            write_delay: None,
            reject_notify: false,
            replies: Vec::new(),
            events: None,
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockRadioLink {
    /// Link exposing the UART service with its TX and RX characteristics.
    pub fn uart() -> Self {
        Self::default()
            .with_characteristic(CharacteristicHandle::new(
                UART_TX_CHAR_UUID,
                UART_SERVICE_UUID,
                CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..CharacteristicProperties::default()
                },
            ))
            .with_characteristic(CharacteristicHandle::new(
                UART_RX_CHAR_UUID,
                UART_SERVICE_UUID,
                CharacteristicProperties {
                    read: true,
                    notify: true,
                    ..CharacteristicProperties::default()
                },
            ))
    }

    pub fn with_characteristic(mut self, handle: CharacteristicHandle) -> Self {
        self.characteristics.retain(|c| c.uuid != handle.uuid);
        self.characteristics.push(handle);
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_peer(mut self, peer: impl Into<PeerId>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Fails the write attempt with the given zero-based index.
    pub fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_writes.insert(index);
        self
    }

    /// Every write completes only after `delay`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Notification subscription requests are rejected.
    pub fn reject_notify(mut self) -> Self {
        self.reject_notify = true;
        self
    }

    /// Emits a notification of `value` on `characteristic` once `after_writes`
    /// write attempts have completed.
    pub fn reply_after(
        mut self,
        after_writes: usize,
        characteristic: Uuid,
        value: impl Into<Bytes>,
    ) -> Self {
        self.replies.push((after_writes, characteristic, value.into()));
        self
    }

    /// Returns the stream of link events emitted by this mock.
    pub fn event_stream(&mut self) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_value(&self, characteristic: Uuid, value: impl Into<Bytes>) {
        self.lock().values.insert(characteristic, value.into());
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Drains and returns all writes captured so far.
    pub fn take_writes(&self) -> Vec<RecordedWrite> {
        std::mem::take(&mut self.lock().writes)
    }

    pub fn write_attempts(&self) -> usize {
        self.lock().write_attempts
    }

    /// Highest number of writes observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn notify_enabled(&self, characteristic: Uuid) -> bool {
        self.lock()
            .notify
            .get(&characteristic)
            .copied()
            .unwrap_or(false)
    }

    fn known(&self, characteristic: &CharacteristicHandle) -> Result<(), LinkError> {
        if self.characteristics.iter().any(|c| c.uuid == characteristic.uuid) {
            Ok(())
        } else {
            Err(LinkError::InvalidCharacteristic)
        }
    }
}

#[async_trait]
impl RadioLink for MockRadioLink {
    async fn discover_characteristic(
        &self,
        uuid: Uuid,
        service_uuid: Uuid,
    ) -> Result<CharacteristicHandle, LinkError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
            .cloned()
            .ok_or(LinkError::InvalidCharacteristic)
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LinkError> {
        let index = {
            let mut state = self.lock();
            state.write_attempts += 1;
            state.write_attempts - 1
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = if self.fail_writes.contains(&index) {
            Err(LinkError::WriteFailed(format!("injected failure at write {index}")))
        } else {
            self.known(characteristic)
        };

        let mut state = self.lock();
        if result.is_ok() {
            state.writes.push(RecordedWrite {
                characteristic: characteristic.uuid,
                data: data.to_vec(),
                mode,
            });
        }
        state.health.record_write(&result);
        drop(state);

        if let Some(events) = &self.events {
            for (after, uuid, value) in &self.replies {
                if *after == index + 1 {
                    let _ = events.send(LinkEvent::Notification {
                        characteristic: *uuid,
                        value: value.clone(),
                    });
                }
            }
        }
        result
    }

    async fn set_notify(
        &self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), LinkError> {
        self.known(characteristic)?;
        if self.reject_notify || !characteristic.properties.notifiable() {
            return Err(LinkError::EnableNotifyFailed);
        }
        self.lock().notify.insert(characteristic.uuid, enabled);
        Ok(())
    }

    async fn read_value(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Option<Bytes>, LinkError> {
        self.known(characteristic)?;
        Ok(self.lock().values.get(&characteristic.uuid).cloned())
    }

    fn mtu(&self) -> usize {
        if self.mtu == 0 {
            DEFAULT_MTU
        } else {
            self.mtu
        }
    }

    fn peer_id(&self) -> Option<PeerId> {
        self.peer.clone()
    }

    fn health_snapshot(&self) -> LinkHealthSnapshot {
        self.lock().health.clone()
    }
}

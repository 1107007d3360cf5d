use std::sync::Arc;

use bytes::Bytes;
use gattlink_core::uuids::{UART_RX_CHAR_UUID, UART_SERVICE_UUID, UART_TX_CHAR_UUID};
use gattlink_core::{AttError, PeerId, DEFAULT_MTU};
use gattlink_transport::PacketLedger;
use uuid::Uuid;

use crate::adapter::PeripheralAdapter;
use crate::server::AttributeServer;
use crate::service::{PeripheralService, ServiceObserver};

/// Packet path of the peripheral-side UART service.
///
/// Writes from centrals to TX are logged as received packets; [`Self::send`]
/// logs a sent packet and pushes it to RX subscribers in notifications of at
/// most `notify_mtu` bytes.
#[derive(Debug)]
pub struct UartPeripheral {
    ledger: Arc<PacketLedger>,
    notify_mtu: usize,
}

impl UartPeripheral {
    pub fn new(cache_enabled: bool) -> Arc<Self> {
        Self::with_notify_mtu(cache_enabled, DEFAULT_MTU)
    }

    pub fn with_notify_mtu(cache_enabled: bool, notify_mtu: usize) -> Arc<Self> {
        Arc::new(Self {
            ledger: Arc::new(PacketLedger::new(cache_enabled)),
            notify_mtu: notify_mtu.max(1),
        })
    }

    pub fn notify_mtu(&self) -> usize {
        self.notify_mtu
    }

    pub fn ledger(&self) -> &Arc<PacketLedger> {
        &self.ledger
    }

    /// Adds the UART service to `server` with this instance as its observer.
    pub fn install<A: PeripheralAdapter>(self: &Arc<Self>, server: &mut AttributeServer<A>) {
        let mut service = PeripheralService::uart();
        service.set_observer(self.clone());
        server.add_service(service);
    }

    /// Unregisters the observer and removes the UART service.
    pub fn uninstall<A: PeripheralAdapter>(&self, server: &mut AttributeServer<A>) -> bool {
        server.clear_observer(UART_SERVICE_UUID);
        server.remove_service(UART_SERVICE_UUID).is_some()
    }

    pub fn send<A: PeripheralAdapter>(
        &self,
        server: &mut AttributeServer<A>,
        data: impl Into<Bytes>,
    ) -> Result<Vec<PeerId>, AttError> {
        let data = data.into();
        self.ledger.record_tx(data.clone(), None);
        if data.len() <= self.notify_mtu {
            return server.push_value(UART_RX_CHAR_UUID, data);
        }
        let mut peers = Vec::new();
        for start in (0..data.len()).step_by(self.notify_mtu) {
            let end = (start + self.notify_mtu).min(data.len());
            peers = server.push_value(UART_RX_CHAR_UUID, data.slice(start..end))?;
        }
        Ok(peers)
    }
}

impl ServiceObserver for UartPeripheral {
    fn on_write(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        peer: Option<&PeerId>,
        written: &[u8],
    ) {
        if characteristic == UART_TX_CHAR_UUID {
            self.ledger
                .record_rx(Bytes::copy_from_slice(written), peer.cloned());
        }
    }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use gattlink_core::uuids::{UART_RX_CHAR_UUID, UART_SERVICE_UUID, UART_TX_CHAR_UUID};
use gattlink_core::{LinkError, Packet, TransportConfig, WriteMode};
use gattlink_transport::{CharacteristicHandle, LinkEvent, PacketLedger, RadioLink};
use tokio_util::sync::CancellationToken;

use crate::chunking::{ChunkedSender, ProgressFn};
use crate::protocol::WritePlan;
use crate::reply::ReplyCorrelator;

#[derive(Debug, Clone)]
struct UartHandles {
    tx: CharacteristicHandle,
    rx: CharacteristicHandle,
    write_mode: WriteMode,
}

#[derive(Debug, Default)]
struct SessionState {
    uart: Option<UartHandles>,
    rssi: Option<i16>,
}

/// Central-side UART state for one connected peripheral.
///
/// Owns the packet ledger and the reply correlator of the connection. Radio
/// events are fed in through [`PeripheralSession::handle_event`].
#[derive(Debug)]
pub struct PeripheralSession<L> {
    link: L,
    config: TransportConfig,
    ledger: Arc<PacketLedger>,
    correlator: ReplyCorrelator,
    state: Mutex<SessionState>,
    cancel: Mutex<CancellationToken>,
    /// Cancelled when the connection drops; tells a stopped send apart from
    /// one the caller cancelled.
    link_lost: Mutex<CancellationToken>,
}

impl<L: RadioLink> PeripheralSession<L> {
    pub fn new(link: L, config: TransportConfig) -> Self {
        let ledger = Arc::new(PacketLedger::new(config.packet_cache_enabled));
        Self {
            link,
            config,
            ledger,
            correlator: ReplyCorrelator::new(UART_RX_CHAR_UUID),
            state: Mutex::new(SessionState::default()),
            cancel: Mutex::new(CancellationToken::new()),
            link_lost: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<PacketLedger> {
        &self.ledger
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discovers the UART characteristics and subscribes to RX notifications.
    pub async fn enable(&self) -> Result<(), LinkError> {
        let tx = self
            .link
            .discover_characteristic(UART_TX_CHAR_UUID, UART_SERVICE_UUID)
            .await?;
        let rx = self
            .link
            .discover_characteristic(UART_RX_CHAR_UUID, UART_SERVICE_UUID)
            .await?;

        if let Err(err) = self.link.set_notify(&rx, true).await {
            tracing::warn!(error = %err, "uart rx notify rejected");
            return Err(LinkError::EnableNotifyFailed);
        }

        let write_mode = tx.write_mode();
        tracing::info!(peer = ?self.link.peer_id(), ?write_mode, "uart enabled");
        self.state().uart = Some(UartHandles { tx, rx, write_mode });
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.state().uart.is_some()
    }

    /// Unsubscribes from RX, cancels in-flight sends and fails a pending reply.
    pub async fn disable(&self) -> Result<(), LinkError> {
        let handles = self.state().uart.take();
        self.cancel_sends();
        self.correlator.fail_pending(LinkError::Cancelled);
        match handles {
            Some(handles) => {
                tracing::info!(peer = ?self.link.peer_id(), "uart disabled");
                self.link.set_notify(&handles.rx, false).await
            }
            None => Ok(()),
        }
    }

    fn handles(&self) -> Result<UartHandles, LinkError> {
        self.state()
            .uart
            .clone()
            .ok_or(LinkError::InvalidCharacteristic)
    }

    fn sender(&self) -> ChunkedSender {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();
        ChunkedSender::new(self.config.mtu.min(self.link.mtu()))
            .with_abort_on_error(self.config.abort_on_chunk_error)
            .with_cancellation(token)
    }

    fn link_lost(&self) -> CancellationToken {
        self.link_lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_tx(&self, data: &[u8]) -> Result<(), LinkError> {
        if data.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        self.ledger
            .record_tx(Bytes::copy_from_slice(data), self.link.peer_id());
        Ok(())
    }

    /// Sends `data` over UART TX with the write mode chosen at enable time,
    /// or interleaved when `interleave_ack_every` is set.
    pub async fn send(&self, data: &[u8]) -> Result<(), LinkError> {
        let plan = self.default_plan(&self.handles()?);
        self.send_planned(data, plan, None).await
    }

    pub async fn send_with_mode(&self, data: &[u8], mode: WriteMode) -> Result<(), LinkError> {
        self.send_planned(data, WritePlan::Uniform(mode), None).await
    }

    /// Acknowledges every `ack_every`-th chunk and writes the rest without
    /// response.
    pub async fn send_interleaved(&self, data: &[u8], ack_every: usize) -> Result<(), LinkError> {
        self.send_planned(data, WritePlan::Interleaved { ack_every }, None)
            .await
    }

    /// Like [`PeripheralSession::send`], reporting progress after every chunk.
    pub async fn send_with_progress(
        &self,
        data: &[u8],
        progress: ProgressFn,
    ) -> Result<(), LinkError> {
        let plan = self.default_plan(&self.handles()?);
        self.send_planned(data, plan, Some(progress)).await
    }

    /// Interleaved acknowledgements when configured and TX accepts both
    /// write modes; the enable-time mode otherwise.
    fn default_plan(&self, handles: &UartHandles) -> WritePlan {
        let props = handles.tx.properties;
        match self.config.interleave_ack_every {
            0 => WritePlan::Uniform(handles.write_mode),
            k if props.write && props.write_without_response => {
                WritePlan::Interleaved { ack_every: k }
            }
            _ => WritePlan::Uniform(handles.write_mode),
        }
    }

    async fn send_planned(
        &self,
        data: &[u8],
        plan: WritePlan,
        progress: Option<ProgressFn>,
    ) -> Result<(), LinkError> {
        let handles = self.handles()?;
        self.record_tx(data)?;
        let lost = self.link_lost();
        let mut sender = self.sender();
        if let Some(progress) = progress {
            sender = sender.with_progress(progress);
        }
        let result = sender.send(&self.link, &handles.tx, data, plan).await;
        stopped_by_link(result, &lost)
    }

    /// Sends `data` and resolves with the next RX notification.
    ///
    /// `timeout` defaults to the configured reply timeout.
    pub async fn send_and_wait(
        &self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Bytes, LinkError> {
        let handles = self.handles()?;
        self.record_tx(data)?;
        let plan = self.default_plan(&handles);
        let lost = self.link_lost();
        let result = self
            .correlator
            .send_and_wait(
                &self.link,
                &self.sender(),
                &handles.tx,
                data,
                plan,
                timeout.unwrap_or(self.config.reply_timeout),
            )
            .await;
        stopped_by_link(result, &lost)
    }

    /// Applies one radio event to the session.
    ///
    /// Returns the packet recorded for a notification that was not consumed
    /// by a pending reply.
    pub fn handle_event(&self, event: LinkEvent) -> Option<Packet> {
        match event {
            LinkEvent::Notification {
                characteristic,
                value,
            } => {
                tracing::trace!(
                    characteristic = %characteristic,
                    data = %hex::encode(&value),
                    "notification"
                );
                if self.correlator.deliver(characteristic, value.clone()) {
                    return None;
                }
                if characteristic != UART_RX_CHAR_UUID {
                    return None;
                }
                Some(self.ledger.record_rx(value, self.link.peer_id()))
            }
            LinkEvent::Disconnected { peer } => {
                tracing::info!(%peer, "peripheral disconnected");
                self.state().uart = None;
                {
                    let mut lost = self.link_lost.lock().unwrap_or_else(PoisonError::into_inner);
                    lost.cancel();
                    *lost = CancellationToken::new();
                }
                self.cancel_sends();
                self.correlator.disconnect();
                None
            }
            LinkEvent::Connected { peer } => {
                tracing::info!(%peer, "peripheral connected");
                if self.config.reset_packets_on_reconnect {
                    self.ledger.clear();
                }
                None
            }
            LinkEvent::RssiUpdated(rssi) => {
                self.state().rssi = Some(rssi);
                None
            }
        }
    }

    /// Cancels every chunked send in flight; later sends are unaffected.
    pub fn cancel_sends(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    pub fn rssi(&self) -> Option<i16> {
        self.state().rssi
    }
}

/// A send cut short by a dropped connection reports `Disconnected`;
/// `Cancelled` stays reserved for caller-initiated aborts.
fn stopped_by_link<T>(
    result: Result<T, LinkError>,
    lost: &CancellationToken,
) -> Result<T, LinkError> {
    match result {
        Err(LinkError::Cancelled) if lost.is_cancelled() => Err(LinkError::Disconnected),
        other => other,
    }
}

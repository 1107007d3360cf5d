use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use gattlink_core::{ByteCounters, Direction, Packet, PeerId};
use tokio::sync::mpsc;

/// Handle returned by [`PacketLedger::observe`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedgerObserverId(u64);

#[derive(Debug, Default)]
struct LedgerState {
    packets: Vec<Packet>,
    observers: Vec<(LedgerObserverId, mpsc::UnboundedSender<Packet>)>,
    next_observer: u64,
}

/// Ordered in-memory log of application messages with running byte counters.
///
/// Append, counter update and observer hand-off happen under one lock, so
/// concurrent receive paths never interleave. Observers get their packets
/// through an unbounded channel and do their own work after the lock is
/// released.
#[derive(Debug)]
pub struct PacketLedger {
    state: Mutex<LedgerState>,
    sent: AtomicU64,
    received: AtomicU64,
    cache_enabled: AtomicBool,
}

impl Default for PacketLedger {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PacketLedger {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            cache_enabled: AtomicBool::new(cache_enabled),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one reassembled inbound message.
    pub fn record_rx(&self, bytes: impl Into<Bytes>, peer_id: Option<PeerId>) -> Packet {
        self.record(Direction::Rx, bytes.into(), peer_id)
    }

    /// Records one outbound message.
    pub fn record_tx(&self, bytes: impl Into<Bytes>, peer_id: Option<PeerId>) -> Packet {
        self.record(Direction::Tx, bytes.into(), peer_id)
    }

    fn record(&self, direction: Direction, payload: Bytes, peer_id: Option<PeerId>) -> Packet {
        let packet = Packet::new(direction, peer_id, payload);
        let mut state = self.lock();

        let counter = match direction {
            Direction::Tx => &self.sent,
            Direction::Rx => &self.received,
        };
        counter.fetch_add(packet.len() as u64, Ordering::Relaxed);

        if self.cache_enabled.load(Ordering::Relaxed) {
            state.packets.push(packet.clone());
        }
        // Receivers that went away are pruned here.
        state
            .observers
            .retain(|(_, tx)| tx.send(packet.clone()).is_ok());

        tracing::trace!(
            ?direction,
            len = packet.len(),
            peer = ?packet.peer_id,
            "packet recorded"
        );
        packet
    }

    /// Registers an observer; every packet recorded afterwards is delivered in order.
    pub fn observe(&self) -> (LedgerObserverId, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = LedgerObserverId(state.next_observer);
        state.next_observer += 1;
        state.observers.push((id, tx));
        (id, rx)
    }

    /// Unregisters an observer. The receiver sees the channel close.
    pub fn unobserve(&self, id: LedgerObserverId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|(observer, _)| *observer != id);
        state.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Drops all cached packets. Counters are left untouched.
    pub fn clear(&self) {
        self.lock().packets.clear();
    }

    pub fn snapshot(&self) -> Vec<Packet> {
        self.lock().packets.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> ByteCounters {
        let _state = self.lock();
        ByteCounters {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        let _state = self.lock();
        self.sent.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    /// With caching disabled only the byte counters move.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::PacketLedger;
    use gattlink_core::{ByteCounters, Direction, PeerId};
    use std::sync::Arc;

    #[test]
    fn records_packets_in_order_with_counters() {
        let ledger = PacketLedger::default();
        ledger.record_tx(vec![1_u8, 2, 3], None);
        ledger.record_rx(vec![4_u8, 5], Some(PeerId::from("p1")));

        let packets = ledger.snapshot();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].direction, Direction::Tx);
        assert_eq!(packets[1].direction, Direction::Rx);
        assert_eq!(packets[1].payload.as_ref(), &[4, 5]);
        assert_eq!(
            ledger.counters(),
            ByteCounters {
                sent: 3,
                received: 2
            }
        );
    }

    #[test]
    fn clear_and_reset_are_independent() {
        let ledger = PacketLedger::default();
        ledger.record_rx(vec![0_u8; 10], None);
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.counters().received, 10);

        ledger.reset_counters();
        assert_eq!(ledger.counters(), ByteCounters::default());
    }

    #[test]
    fn disabled_cache_only_counts_bytes() {
        let ledger = PacketLedger::new(false);
        ledger.record_rx(vec![7_u8; 64], None);
        ledger.record_tx(vec![7_u8; 8], None);
        assert!(ledger.snapshot().is_empty());
        assert_eq!(
            ledger.counters(),
            ByteCounters {
                sent: 8,
                received: 64
            }
        );
    }

    #[test]
    fn observer_receives_each_packet_once_until_unobserved() {
        let ledger = PacketLedger::default();
        let (id, mut rx) = ledger.observe();

        ledger.record_rx(vec![1_u8], None);
        ledger.record_tx(vec![2_u8], None);
        let first = rx.try_recv().expect("first packet");
        let second = rx.try_recv().expect("second packet");
        assert_eq!(first.payload.as_ref(), &[1]);
        assert_eq!(second.direction, Direction::Tx);
        assert!(rx.try_recv().is_err());

        assert!(ledger.unobserve(id));
        assert!(!ledger.unobserve(id));
        ledger.record_rx(vec![3_u8], None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_observer_is_pruned_on_next_record() {
        let ledger = PacketLedger::default();
        let (_id, rx) = ledger.observe();
        drop(rx);
        assert_eq!(ledger.observer_count(), 1);
        ledger.record_rx(vec![1_u8], None);
        assert_eq!(ledger.observer_count(), 0);
    }

    #[test]
    fn concurrent_receives_are_not_interleaved() {
        let ledger = Arc::new(PacketLedger::default());
        let (_id, mut rx) = ledger.observe();

        let workers: Vec<_> = (0..4_u8)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        ledger.record_rx(vec![worker; 4], None);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 1000);
        assert_eq!(ledger.counters().received, 4000);

        // The observer sees exactly the ledger order.
        for expected in &snapshot {
            let delivered = rx.try_recv().expect("delivered packet");
            assert_eq!(delivered.payload, expected.payload);
            assert_eq!(delivered.timestamp, expected.timestamp);
        }
        assert!(rx.try_recv().is_err());
    }
}

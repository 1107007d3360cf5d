use std::sync::Arc;

use gattlink_core::{LinkError, DEFAULT_MTU};
use gattlink_transport::{CharacteristicHandle, RadioLink};
use tokio_util::sync::CancellationToken;

use crate::protocol::WritePlan;

/// Progress observer, called with the fraction of bytes written so far.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Splits `payload` into link-sized chunks in send order.
pub fn split_into_chunks(payload: &[u8], mtu: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(mtu.max(1))
}

/// Number of writes needed for `len` bytes at `mtu` bytes per write.
pub fn chunk_count(len: usize, mtu: usize) -> usize {
    len.div_ceil(mtu.max(1))
}

/// Writes a buffer as an ordered sequence of link-sized writes.
///
/// Only one write is outstanding at a time: chunk `i + 1` is issued after the
/// write of chunk `i` has completed, whatever its outcome.
#[derive(Clone)]
pub struct ChunkedSender {
    mtu: usize,
    abort_on_error: bool,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for ChunkedSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSender")
            .field("mtu", &self.mtu)
            .field("abort_on_error", &self.abort_on_error)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for ChunkedSender {
    fn default() -> Self {
        Self::new(DEFAULT_MTU)
    }
}

impl ChunkedSender {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu: if mtu == 0 { DEFAULT_MTU } else { mtu },
            abort_on_error: false,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Stop at the first failed chunk instead of writing the rest.
    pub fn with_abort_on_error(mut self, abort_on_error: bool) -> Self {
        self.abort_on_error = abort_on_error;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Token observed before each chunk; cancelling it ends the send with
    /// [`LinkError::Cancelled`].
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Writes `payload` to `characteristic` and resolves once, after the last
    /// issued chunk has completed.
    ///
    /// A failed chunk is logged and, unless abort-on-error is set, the
    /// remaining chunks are still written; the error of the last failed chunk
    /// is returned.
    pub async fn send<L: RadioLink + ?Sized>(
        &self,
        link: &L,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
        plan: WritePlan,
    ) -> Result<(), LinkError> {
        if payload.is_empty() {
            return Err(LinkError::EmptyPayload);
        }

        let total = payload.len();
        let chunks = chunk_count(total, self.mtu);
        let mut written = 0_usize;
        let mut last_error = None;

        tracing::debug!(
            characteristic = %characteristic.uuid,
            len = total,
            chunks,
            mtu = self.mtu,
            "chunked send start"
        );

        for (index, chunk) in split_into_chunks(payload, self.mtu).enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(index, chunks, "chunked send cancelled");
                return Err(LinkError::Cancelled);
            }

            let mode = plan.mode_for(index);
            tracing::trace!(index, ?mode, data = %hex::encode(chunk), "write chunk");
            if let Err(err) = link.write(characteristic, chunk, mode).await {
                tracing::warn!(index, chunks, error = %err, "chunk write failed");
                last_error = Some(err);
                if self.abort_on_error {
                    break;
                }
            }

            written += chunk.len();
            if let Some(progress) = &self.progress {
                progress(written as f32 / total as f32);
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => {
                tracing::debug!(len = total, chunks, "chunked send complete");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{chunk_count, split_into_chunks, ChunkedSender};
    use crate::protocol::WritePlan;
    use gattlink_core::uuids::{UART_SERVICE_UUID, UART_TX_CHAR_UUID};
    use gattlink_core::{LinkError, WriteMode};
    use gattlink_transport::{CharacteristicHandle, MockRadioLink, RadioLink};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn uart_tx(link: &MockRadioLink) -> CharacteristicHandle {
        link.discover_characteristic(UART_TX_CHAR_UUID, UART_SERVICE_UUID)
            .await
            .expect("uart tx")
    }

    #[tokio::test]
    async fn forty_five_bytes_over_twenty_byte_mtu() {
        let link = MockRadioLink::uart();
        let tx = uart_tx(&link).await;
        let payload: Vec<u8> = (0..45).collect();

        ChunkedSender::new(20)
            .send(&link, &tx, &payload, WritePlan::Uniform(WriteMode::Acknowledged))
            .await
            .expect("send ok");

        let writes = link.writes();
        let lens: Vec<_> = writes.iter().map(|w| w.data.len()).collect();
        assert_eq!(lens, vec![20, 20, 5]);
        assert!(writes.iter().all(|w| w.mode == WriteMode::Acknowledged));
        let joined: Vec<u8> = writes.into_iter().flat_map(|w| w.data).collect();
        assert_eq!(joined, payload);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_without_writes() {
        let link = MockRadioLink::uart();
        let tx = uart_tx(&link).await;
        let err = ChunkedSender::default()
            .send(&link, &tx, &[], WritePlan::Uniform(WriteMode::Acknowledged))
            .await
            .expect_err("empty payload");
        assert_eq!(err, LinkError::EmptyPayload);
        assert_eq!(link.write_attempts(), 0);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_stop_remaining_chunks_by_default() {
        let link = MockRadioLink::uart().fail_write_at(1);
        let tx = uart_tx(&link).await;

        let err = ChunkedSender::new(4)
            .send(&link, &tx, &[0_u8; 12], WritePlan::Uniform(WriteMode::Acknowledged))
            .await
            .expect_err("middle chunk fails");
        assert!(matches!(err, LinkError::WriteFailed(_)));
        assert_eq!(link.write_attempts(), 3);
        assert_eq!(link.writes().len(), 2);
    }

    #[tokio::test]
    async fn last_failed_chunk_error_is_reported() {
        let link = MockRadioLink::uart().fail_write_at(0).fail_write_at(2);
        let tx = uart_tx(&link).await;

        let err = ChunkedSender::new(1)
            .send(&link, &tx, &[1, 2, 3], WritePlan::Uniform(WriteMode::Acknowledged))
            .await
            .expect_err("two chunks fail");
        assert_eq!(
            err,
            LinkError::WriteFailed("injected failure at write 2".into())
        );
    }

    #[tokio::test]
    async fn abort_on_error_stops_after_first_failure() {
        let link = MockRadioLink::uart().fail_write_at(1);
        let tx = uart_tx(&link).await;

        let err = ChunkedSender::new(4)
            .with_abort_on_error(true)
            .send(&link, &tx, &[0_u8; 12], WritePlan::Uniform(WriteMode::Acknowledged))
            .await
            .expect_err("aborts");
        assert_eq!(err, LinkError::WriteFailed("injected failure at write 1".into()));
        assert_eq!(link.write_attempts(), 2);
    }

    #[tokio::test]
    async fn cancelled_send_issues_no_further_chunks() {
        let link = MockRadioLink::uart();
        let tx = uart_tx(&link).await;
        let sender = ChunkedSender::new(5);
        sender.cancellation().cancel();

        let err = sender
            .send(&link, &tx, &[9_u8; 30], WritePlan::Uniform(WriteMode::Unacknowledged))
            .await
            .expect_err("cancelled");
        assert_eq!(err, LinkError::Cancelled);
        assert_eq!(link.write_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_send_keeps_completed_chunks() {
        let link = Arc::new(MockRadioLink::uart().with_write_delay(Duration::from_millis(10)));
        let tx = uart_tx(&link).await;
        let sender = ChunkedSender::new(10);
        let token = sender.cancellation().clone();

        let task = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                sender
                    .send(&*link, &tx, &[1_u8; 100], WritePlan::Uniform(WriteMode::Acknowledged))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(25)).await;
        token.cancel();

        let result = task.await.expect("send task");
        assert_eq!(result, Err(LinkError::Cancelled));
        let written = link.writes().len();
        assert!((2..10).contains(&written), "wrote {written} chunks");
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_write_is_outstanding() {
        let link = MockRadioLink::uart().with_write_delay(Duration::from_millis(5));
        let tx = uart_tx(&link).await;

        ChunkedSender::new(20)
            .send(&link, &tx, &[3_u8; 200], WritePlan::Uniform(WriteMode::Unacknowledged))
            .await
            .expect("send ok");
        assert_eq!(link.writes().len(), 10);
        assert_eq!(link.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn interleaved_send_marks_checkpoints() {
        let link = MockRadioLink::uart();
        let tx = uart_tx(&link).await;

        ChunkedSender::new(20)
            .send(&link, &tx, &[0_u8; 90], WritePlan::Interleaved { ack_every: 2 })
            .await
            .expect("send ok");
        let modes: Vec<_> = link.writes().into_iter().map(|w| w.mode).collect();
        assert_eq!(
            modes,
            vec![
                WriteMode::Unacknowledged,
                WriteMode::Acknowledged,
                WriteMode::Unacknowledged,
                WriteMode::Acknowledged,
                WriteMode::Unacknowledged,
            ]
        );
    }

    #[tokio::test]
    async fn progress_reaches_one_after_last_chunk() {
        let link = MockRadioLink::uart();
        let tx = uart_tx(&link).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        ChunkedSender::new(20)
            .with_progress(Arc::new(move |fraction: f32| {
                sink.lock().expect("progress lock").push(fraction);
            }))
            .send(&link, &tx, &[0_u8; 50], WritePlan::Uniform(WriteMode::Acknowledged))
            .await
            .expect("send ok");

        let seen = seen.lock().expect("progress lock").clone();
        assert_eq!(seen, vec![0.4, 0.8, 1.0]);
    }

    proptest! {
        #[test]
        fn chunks_cover_payload_in_order(
            payload in proptest::collection::vec(any::<u8>(), 1..600),
            mtu in 1_usize..200,
        ) {
            let chunks: Vec<&[u8]> = split_into_chunks(&payload, mtu).collect();
            prop_assert_eq!(chunks.len(), chunk_count(payload.len(), mtu));
            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= mtu));
            prop_assert_eq!(chunks.concat(), payload);
        }
    }
}

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use gattlink_core::LinkError;
use gattlink_transport::{CharacteristicHandle, RadioLink};
use tokio::sync::{oneshot, Semaphore};
use uuid::Uuid;

use crate::chunking::ChunkedSender;
use crate::protocol::WritePlan;

type ReplySlot = oneshot::Sender<Result<Bytes, LinkError>>;

/// Turns "send, then wait for the next notification" into one call with a
/// deadline.
///
/// Calls are serialized: a second `send_and_wait` waits (FIFO) until the
/// first has resolved, so at most one listener is armed at a time. The
/// listener is armed before the first chunk is written and the deadline
/// starts once the last chunk has completed.
#[derive(Debug)]
pub struct ReplyCorrelator {
    reply_characteristic: Uuid,
    gate: Semaphore,
    armed: Mutex<Option<ReplySlot>>,
}

impl ReplyCorrelator {
    pub fn new(reply_characteristic: Uuid) -> Self {
        Self {
            reply_characteristic,
            gate: Semaphore::new(1),
            armed: Mutex::new(None),
        }
    }

    pub fn reply_characteristic(&self) -> Uuid {
        self.reply_characteristic
    }

    fn slot(&self) -> MutexGuard<'_, Option<ReplySlot>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }

    /// Sends `payload` through `sender` and resolves with the first
    /// notification on the reply characteristic, or [`LinkError::Timeout`].
    pub async fn send_and_wait<L: RadioLink + ?Sized>(
        &self,
        link: &L,
        sender: &ChunkedSender,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
        plan: WritePlan,
        timeout: Duration,
    ) -> Result<Bytes, LinkError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| LinkError::Cancelled)?;

        let (tx, mut rx) = oneshot::channel();
        *self.slot() = Some(tx);

        if let Err(err) = sender.send(link, characteristic, payload, plan).await {
            self.slot().take();
            // A disconnect during the send resolves the slot before the
            // sender sees its cancellation.
            return match rx.try_recv() {
                Ok(Err(resolved)) => Err(resolved),
                _ => Err(err),
            };
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Slot dropped without an answer.
            Ok(Err(_)) => Err(LinkError::Disconnected),
            Err(_) => {
                self.slot().take();
                tracing::warn!(
                    characteristic = %self.reply_characteristic,
                    ?timeout,
                    "reply timed out"
                );
                Err(LinkError::Timeout)
            }
        }
    }

    /// Offers a notification to the armed listener.
    ///
    /// Returns `true` when the value resolved a pending call; values on other
    /// characteristics, or arriving while nothing is armed, are left to the
    /// caller.
    pub fn deliver(&self, characteristic: Uuid, value: Bytes) -> bool {
        if characteristic != self.reply_characteristic {
            return false;
        }
        let Some(slot) = self.slot().take() else {
            return false;
        };
        let consumed = slot.send(Ok(value)).is_ok();
        if consumed {
            tracing::trace!(characteristic = %characteristic, "reply delivered");
        }
        consumed
    }

    /// Resolves an armed listener with `error` immediately.
    pub fn fail_pending(&self, error: LinkError) -> bool {
        match self.slot().take() {
            Some(slot) => slot.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Connection dropped: an armed call resolves with [`LinkError::Disconnected`].
    pub fn disconnect(&self) -> bool {
        self.fail_pending(LinkError::Disconnected)
    }
}

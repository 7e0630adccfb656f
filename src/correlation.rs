//! Single-slot acknowledgment correlation.
//!
//! A [`Correlator`] holds at most one outstanding wait. The waiting side arms
//! it with an [`AckFilter`] before sending, the delivery side offers every
//! decoded envelope, and the first matching envelope resolves the wait
//! exactly once. Envelopes that do not match are left alone, so telemetry or
//! acknowledgments for other slots never release a wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{AckStatus, CommandKind, ResponseEnvelope};
use crate::types::SlotIndex;

/// Which acknowledgment a wait is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFilter {
    /// Command kind that must be echoed.
    pub kind: CommandKind,
    /// Slot that must be referenced (`None` = no slot).
    pub slot: Option<SlotIndex>,
}

impl AckFilter {
    /// Acknowledgment of a periodic configuration in `slot`.
    #[must_use]
    pub const fn slot(slot: SlotIndex) -> Self {
        Self {
            kind: CommandKind::ModbusPeriodic,
            slot: Some(slot),
        }
    }

    /// Acknowledgment of a slot-less command.
    #[must_use]
    pub const fn command(kind: CommandKind) -> Self {
        Self { kind, slot: None }
    }

    /// Returns true if `envelope` is the awaited ACK or NACK.
    #[must_use]
    pub fn matches(&self, envelope: &ResponseEnvelope) -> bool {
        envelope.ack != AckStatus::Unknown
            && envelope.kind == self.kind
            && envelope.slot == self.slot
    }
}

struct Pending {
    id: u64,
    filter: AckFilter,
    tx: oneshot::Sender<AckStatus>,
}

#[derive(Default)]
struct CorrelatorInner {
    pending: Mutex<Option<Pending>>,
    next_id: AtomicU64,
}

/// Shared correlation slot between the delivery task and one waiter.
#[derive(Clone, Default)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_filter())
            .finish()
    }
}

impl Correlator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a wait for `filter`.
    ///
    /// Must be called before the command is sent, so a fast reply cannot
    /// slip past.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitPending`] if another wait is still outstanding.
    pub fn arm(&self, filter: AckFilter) -> Result<AckWaiter> {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if pending.as_ref().is_some_and(|p| !p.tx.is_closed()) {
            return Err(Error::WaitPending);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *pending = Some(Pending { id, filter, tx });
        tracing::trace!(?filter, id, "armed acknowledgment wait");

        Ok(AckWaiter {
            id,
            filter,
            rx,
            correlator: self.clone(),
        })
    }

    /// Offers a decoded envelope. Returns true if it resolved the wait.
    pub fn offer(&self, envelope: &ResponseEnvelope) -> bool {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match pending.take() {
            Some(p) if p.filter.matches(envelope) => {
                tracing::debug!(filter = ?p.filter, ack = %envelope.ack, "acknowledgment matched");
                // Receiver may already be gone after a timeout.
                let _ = p.tx.send(envelope.ack);
                true
            }
            other => {
                *pending = other;
                false
            }
        }
    }

    /// Returns the filter of the outstanding wait, if any.
    #[must_use]
    pub fn pending_filter(&self) -> Option<AckFilter> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.filter)
    }

    fn retire(&self, id: u64) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
        }
    }
}

/// An armed wait. Dropping it abandons the wait.
#[derive(Debug)]
pub struct AckWaiter {
    id: u64,
    filter: AckFilter,
    rx: oneshot::Receiver<AckStatus>,
    correlator: Correlator,
}

impl AckWaiter {
    /// Returns the filter this wait was armed with.
    #[must_use]
    pub const fn filter(&self) -> AckFilter {
        self.filter
    }

    /// Waits for the matching ACK or NACK.
    ///
    /// # Errors
    ///
    /// - [`Error::ResponseTimeout`] if nothing matched within `timeout`
    /// - [`Error::Cancelled`] if `cancel` fired first
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> Result<AckStatus> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = &mut self.rx => result.map_err(|_| Error::ChannelClosed),
            () = tokio::time::sleep(timeout) => Err(Error::ResponseTimeout {
                timeout_ms: Error::millis(timeout),
            }),
        }
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        self.correlator.retire(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(slot: u8) -> ResponseEnvelope {
        ResponseEnvelope::new(CommandKind::ModbusPeriodic, AckStatus::Ack)
            .with_slot(SlotIndex::new(slot).unwrap())
    }

    #[test]
    fn test_filter_matching() {
        let filter = AckFilter::slot(SlotIndex::new(3).unwrap());
        assert!(filter.matches(&ack(3)));
        assert!(!filter.matches(&ack(2)));

        let telemetry = ResponseEnvelope::new(CommandKind::ModbusPeriodic, AckStatus::Unknown)
            .with_slot(SlotIndex::new(3).unwrap());
        assert!(!filter.matches(&telemetry));

        let one_shot = ResponseEnvelope::new(CommandKind::ModbusOneShot, AckStatus::Ack);
        assert!(!filter.matches(&one_shot));
        assert!(AckFilter::command(CommandKind::ModbusOneShot).matches(&one_shot));
    }

    #[tokio::test]
    async fn test_offer_resolves_once() {
        let correlator = Correlator::new();
        let waiter = correlator
            .arm(AckFilter::slot(SlotIndex::new(1).unwrap()))
            .unwrap();

        assert!(!correlator.offer(&ack(2)));
        assert!(correlator.offer(&ack(1)));
        assert!(!correlator.offer(&ack(1)));

        let status = waiter
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, AckStatus::Ack);
        assert_eq!(correlator.pending_filter(), None);
    }

    #[tokio::test]
    async fn test_single_outstanding_wait() {
        let correlator = Correlator::new();
        let first = correlator
            .arm(AckFilter::slot(SlotIndex::FIRST))
            .unwrap();
        assert!(matches!(
            correlator.arm(AckFilter::slot(SlotIndex::LAST)),
            Err(Error::WaitPending)
        ));
        drop(first);
        assert!(correlator.arm(AckFilter::slot(SlotIndex::LAST)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_retire() {
        let correlator = Correlator::new();
        let waiter = correlator
            .arm(AckFilter::slot(SlotIndex::FIRST))
            .unwrap();
        let result = waiter
            .wait(Duration::from_millis(500), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(Error::ResponseTimeout { timeout_ms: 500 })
        ));
        assert_eq!(correlator.pending_filter(), None);
        assert!(!correlator.offer(&ack(1)));
    }

    #[tokio::test]
    async fn test_cancel() {
        let correlator = Correlator::new();
        let waiter = correlator
            .arm(AckFilter::slot(SlotIndex::FIRST))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            waiter.wait(Duration::from_secs(60), &cancel).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_offer_from_other_task() {
        let correlator = Correlator::new();
        let waiter = correlator
            .arm(AckFilter::slot(SlotIndex::new(5).unwrap()))
            .unwrap();

        let delivery = correlator.clone();
        tokio::spawn(async move {
            delivery.offer(&ack(4));
            delivery.offer(&ack(5));
        });

        let status = waiter
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, AckStatus::Ack);
    }
}

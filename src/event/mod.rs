//! Event system for async message handling.
//!
//! Every uplink is classified once by the client's processing task and then
//! broadcast here, so observers and one-shot waits see the same result.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::classify::Classified;
use crate::error::DecodeError;
use crate::protocol::CommandKind;
use crate::types::SlotIndex;

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Classified uplink from the device.
    Uplink(Box<Classified>),
    /// Uplink whose envelope could not be decoded.
    Undecodable {
        /// Decoder error.
        error: DecodeError,
        /// Raw payload.
        data: Bytes,
    },
}

impl Event {
    /// Returns the command kind of an uplink event.
    #[must_use]
    pub fn command_kind(&self) -> Option<CommandKind> {
        match self {
            Self::Uplink(classified) => Some(classified.envelope.kind),
            _ => None,
        }
    }

    /// Returns the classified uplink, if this is one.
    #[must_use]
    pub fn uplink(&self) -> Option<&Classified> {
        match self {
            Self::Uplink(classified) => Some(classified),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next event passing this subscription's filter.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receives the next event matching `filter`, giving up after `timeout`.
    pub async fn recv_matching(
        &mut self,
        filter: &EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        tokio::select! {
            biased;
            result = async {
                loop {
                    let event = self.recv().await?;
                    if filter.matches(&event) {
                        return Some(event);
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

/// Subscription filter for uplink events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by command kinds.
    pub kinds: Option<Vec<CommandKind>>,
    /// Filter by referenced slot.
    pub slot: Option<SlotIndex>,
    /// Only pass replies: Modbus data or a rejection.
    pub replies_only: bool,
}

impl EventFilter {
    /// Creates a filter for specific command kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<CommandKind>) -> Self {
        Self {
            kinds: Some(kinds),
            slot: None,
            replies_only: false,
        }
    }

    /// Creates a filter for the reply to a command of `kind`.
    #[must_use]
    pub fn reply(kind: CommandKind) -> Self {
        Self {
            kinds: Some(vec![kind]),
            slot: None,
            replies_only: true,
        }
    }

    /// Restricts the filter to uplinks referencing `slot`.
    #[must_use]
    pub const fn slot(mut self, slot: SlotIndex) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let Some(classified) = event.uplink() else {
            return self.kinds.is_none() && self.slot.is_none() && !self.replies_only;
        };
        let envelope = &classified.envelope;

        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&envelope.kind) {
                return false;
            }
        }

        if self.slot.is_some() && envelope.slot != self.slot {
            return false;
        }

        if self.replies_only && classified.modbus.is_none() && !envelope.ack.is_rejection() {
            return false;
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            filter,
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Only events dispatched after this call are seen. Subscribe first and
    /// use [`Subscription::recv_matching`] when the trigger is sent before
    /// waiting.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe(None);
        subscription.recv_matching(&filter, timeout).await
    }
}

//! In-process transport.
//!
//! [`MemoryTransport`] is handed to the client; the matching [`MemoryPeer`]
//! plays the device side: it sees every downlink and injects uplinks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{Destination, Transport, UPLINK_CHANNEL_CAPACITY};

/// A payload sent through a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Addressed node.
    pub destination: Destination,
    /// Encoded command.
    pub data: Bytes,
}

/// Client half of an in-process transport pair.
pub struct MemoryTransport {
    connected: bool,
    downlink_tx: mpsc::UnboundedSender<Downlink>,
    uplink_rx: Option<mpsc::Receiver<Bytes>>,
    failures: Arc<AtomicUsize>,
}

/// Device half of an in-process transport pair.
pub struct MemoryPeer {
    downlink_rx: mpsc::UnboundedReceiver<Downlink>,
    uplink_tx: mpsc::Sender<Bytes>,
    failures: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Creates a connected pair of transport and peer.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        let (downlink_tx, downlink_rx) = mpsc::unbounded_channel();
        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_CHANNEL_CAPACITY);
        let failures = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            connected: false,
            downlink_tx,
            uplink_rx: Some(uplink_rx),
            failures: Arc::clone(&failures),
        };
        let peer = MemoryPeer {
            downlink_rx,
            uplink_tx,
            failures,
        };
        (transport, peer)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected = true;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.connected = false;
            Ok(())
        })
    }

    fn send(
        &mut self,
        destination: &Destination,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let downlink = Downlink {
            destination: destination.clone(),
            data,
        };
        Box::pin(async move {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            let scripted_failure = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if scripted_failure {
                return Err(Error::TransportTimeout { timeout_ms: 0 });
            }
            self.downlink_tx
                .send(downlink)
                .map_err(|_| Error::ChannelClosed)
        })
    }

    fn take_uplink(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.uplink_rx.take()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl MemoryPeer {
    /// Waits for the next downlink.
    pub async fn next_downlink(&mut self) -> Option<Downlink> {
        self.downlink_rx.recv().await
    }

    /// Returns a downlink if one is queued.
    pub fn try_downlink(&mut self) -> Option<Downlink> {
        self.downlink_rx.try_recv().ok()
    }

    /// Delivers an uplink payload to the client.
    pub async fn deliver(&self, data: impl Into<Bytes>) -> Result<()> {
        self.uplink_tx
            .send(data.into())
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Makes the next `count` sends fail with a transport timeout.
    pub fn fail_next_sends(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

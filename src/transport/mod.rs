//! Transport layer between this host and the device's mesh node.
//!
//! This module provides the abstraction for different transport methods:
//! an MQTT gateway bridge and an in-process pair for tests and simulators.

pub mod memory;
pub mod mqtt;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Source endpoint of downlink commands.
pub const DOWNLINK_SRC_EP: u8 = 77;

/// Destination endpoint of downlink commands.
pub const DOWNLINK_DST_EP: u8 = 66;

/// Source endpoint of device uplinks.
pub const UPLINK_SRC_EP: u8 = 66;

/// Destination endpoint of device uplinks.
pub const UPLINK_DST_EP: u8 = 77;

/// Default sink identifier.
pub const DEFAULT_SINK: &str = "sink0";

/// Default mesh node address of the device.
pub const DEFAULT_NODE: u32 = 21;

/// Capacity of uplink channels.
pub const UPLINK_CHANNEL_CAPACITY: usize = 256;

/// Mesh address of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Gateway identifier.
    pub gateway: String,
    /// Sink identifier on the gateway.
    pub sink: String,
    /// Node address in the mesh.
    pub node: u32,
}

impl Destination {
    /// Creates a destination on the default sink and node.
    #[must_use]
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            sink: DEFAULT_SINK.to_owned(),
            node: DEFAULT_NODE,
        }
    }

    /// Sets the sink.
    #[must_use]
    pub fn sink(mut self, sink: impl Into<String>) -> Self {
        self.sink = sink.into();
        self
    }

    /// Sets the node address.
    #[must_use]
    pub const fn node(mut self, node: u32) -> Self {
        self.node = node;
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.gateway, self.sink, self.node)
    }
}

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Connects and starts uplink delivery.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Disconnects.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Sends one payload to a node on the protocol's endpoint pair.
    ///
    /// Delivery is at most once; implementations do not retry.
    fn send(
        &mut self,
        destination: &Destination,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Takes the receiver of raw uplink payloads.
    ///
    /// This can only be called once.
    fn take_uplink(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

pub use memory::{Downlink, MemoryPeer, MemoryTransport};
pub use mqtt::{MqttConfig, MqttTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_defaults() {
        let dest = Destination::new("gw1");
        assert_eq!(dest.sink, "sink0");
        assert_eq!(dest.node, 21);
        assert_eq!(dest.node(42).sink("sink1").to_string(), "gw1:sink1/42");
    }
}

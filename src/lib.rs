//! # meshbus
//!
//! A Rust client library for Modbus measurement devices reached through a
//! wireless mesh gateway.
//!
//! The device bridges a serial Modbus RTU bus into the mesh. This library
//! wraps Modbus frames into the device's command protocol, publishes them
//! through the gateway, decodes the uplinks that come back, and provisions
//! the device's periodic polling slots one acknowledgment at a time.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Event-driven handling of uplinks (telemetry, acknowledgments, replies)
//! - Single-slot acknowledgment correlation with timeout and cancellation
//! - Modbus RTU request building and CRC-checked response decoding
//! - MQTT gateway transport and an in-memory transport for tests
//!
//! ## Quick Start
//!
//! ```no_run
//! use meshbus::{DeviceLink, Destination, MqttConfig, TargetPort};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meshbus::Error> {
//!     let config = MqttConfig::new("broker.example.com").credentials("user", "secret");
//!     let mut link = DeviceLink::mqtt(config, Destination::new("gw-01").node(21));
//!     link.connect().await?;
//!
//!     let volts = link.read_float(TargetPort::Port1, 1, 0x0000).await?;
//!     println!("Voltage: {volts} V");
//!
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Device settings, configuration slots, float reconstruction
//! - [`protocol`] - Commands, response envelopes and the codec seam
//! - [`modbus`] - RTU request frames and response decoding
//! - [`classify`] - Layered decoding of uplinks
//! - [`correlation`] - Acknowledgment waits
//! - [`transport`] - MQTT and in-memory transports
//! - [`event`] - Async event system for uplinks
//! - [`commands`] - Command handler for device operations
//! - [`provision`] - Ack-gated slot provisioning
//! - [`client`] - High-level [`DeviceLink`] client

pub mod classify;
pub mod client;
pub mod commands;
pub mod correlation;
pub mod error;
pub mod event;
pub mod modbus;
pub mod protocol;
pub mod provision;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use classify::{Classified, Classifier};
pub use client::DeviceLink;
pub use commands::CommandHandler;
pub use correlation::{AckFilter, AckWaiter, Correlator};
pub use error::{DecodeError, EncodeError, Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, Subscription};
pub use modbus::{ModbusResponse, RtuFrameBuilder};
pub use protocol::{
    AckStatus, Command, CommandKind, ProtocolCodec, RequestBuilder, ResponseEnvelope, WireCodec,
};
pub use provision::{ProvisionConfig, ProvisionReport, ProvisionState, Provisioner};
pub use transport::{Destination, MemoryPeer, MemoryTransport, MqttConfig, MqttTransport, Transport};
pub use types::{
    AntennaConfig, ConfigurationSlot, DeviceMode, Parity, PortConfig, SlotIndex, StopBits,
    TargetPort, word_swapped_f32,
};

//! Main [`DeviceLink`] client implementation.
//!
//! This module provides the high-level [`DeviceLink`] client that combines
//! transport, uplink processing, correlation, and commands into a unified
//! interface.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::classify::Classifier;
use crate::commands::CommandHandler;
use crate::correlation::Correlator;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::modbus::{ModbusResponse, RtuFrameBuilder};
use crate::protocol::{AckStatus, ProtocolCodec, RequestBuilder};
use crate::transport::{Destination, MqttConfig, MqttTransport, Transport};
use crate::types::TargetPort;

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Client for one device behind a mesh gateway.
pub struct DeviceLink<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    correlator: Correlator,
    classifier: Classifier,
    commands: CommandHandler<T>,

    // Background tasks
    process_task: Option<JoinHandle<()>>,
}

impl DeviceLink<MqttTransport> {
    /// Creates a new client reaching `destination` through an MQTT broker.
    ///
    /// Only uplinks from the destination's gateway and sink are received.
    #[must_use]
    pub fn mqtt(config: MqttConfig, destination: Destination) -> Self {
        let transport = MqttTransport::new(config.uplinks_from(&destination));
        Self::new(transport, destination)
    }
}

impl<T: Transport + 'static> DeviceLink<T> {
    /// Creates a new client with the given transport and the built-in codec.
    #[must_use]
    pub fn new(transport: T, destination: Destination) -> Self {
        let dispatcher = EventDispatcher::new(EVENT_CHANNEL_CAPACITY);
        let correlator = Correlator::new();
        let transport = Arc::new(Mutex::new(transport));

        let commands = CommandHandler::new(
            Arc::clone(&transport),
            dispatcher.clone(),
            correlator.clone(),
            destination,
        );

        Self {
            transport,
            dispatcher,
            correlator,
            classifier: Classifier::default(),
            commands,
            process_task: None,
        }
    }

    /// Creates a new client encoding and decoding through `codec`.
    #[must_use]
    pub fn with_codec(transport: T, destination: Destination, codec: Arc<dyn ProtocolCodec>) -> Self {
        let mut link = Self::new(transport, destination);
        link.commands
            .set_request_builder(RequestBuilder::new(Arc::clone(&codec)));
        link.classifier = Classifier::new(codec);
        link
    }

    /// Connects the transport and starts uplink processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to connect.
    pub async fn connect(&mut self) -> Result<()> {
        let uplink = {
            let mut transport = self.transport.lock().await;
            transport.connect().await?;
            transport.take_uplink()
        };

        if self.process_task.is_none() {
            let uplink = uplink.ok_or(Error::ChannelClosed)?;
            self.process_task = Some(tokio::spawn(process_uplinks(
                uplink,
                self.classifier.clone(),
                self.correlator.clone(),
                self.dispatcher.clone(),
            )));
        }

        tracing::info!(destination = %self.commands.destination(), "device link up");
        self.dispatcher.dispatch(Event::Connected);
        Ok(())
    }

    /// Disconnects the transport.
    ///
    /// Uplink processing keeps running so a later [`DeviceLink::connect`]
    /// resumes delivery.
    pub async fn disconnect(&mut self) -> Result<()> {
        {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await?;
        }

        self.dispatcher.dispatch(Event::Disconnected);
        Ok(())
    }

    /// Returns true if connected.
    pub async fn is_connected(&self) -> bool {
        let transport = self.transport.lock().await;
        transport.is_connected()
    }

    /// Returns the command handler for direct command access.
    #[must_use]
    pub const fn commands(&self) -> &CommandHandler<T> {
        &self.commands
    }

    /// Returns the command handler for configuration.
    pub fn commands_mut(&mut self) -> &mut CommandHandler<T> {
        &mut self.commands
    }

    /// Returns the acknowledgment correlator.
    #[must_use]
    pub const fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe(None)
    }

    /// Subscribes to events passing `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        self.dispatcher.subscribe(Some(filter))
    }

    // ==================== High-Level Device Methods ====================

    /// Reads a word-swapped float from two input registers at `address`.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] if the device or the slave refused the request
    /// - [`Error::Decode`] if the embedded Modbus frame was malformed
    /// - [`Error::ResponseTimeout`] if no reply arrived
    pub async fn read_float(&self, port: TargetPort, slave: u8, address: u16) -> Result<f32> {
        let frame = RtuFrameBuilder::new(slave).read_input_registers(address, 2)?;
        let reply = self.commands.modbus_one_shot(port, frame).await?;

        if let Some(value) = reply.reading {
            return Ok(value);
        }
        if let AckStatus::Nack(reason) = reply.envelope.ack {
            return Err(Error::Rejected {
                reason: format!("device nack {reason}"),
            });
        }
        match reply.modbus {
            Some(Err(e)) => Err(Error::Decode(e)),
            Some(Ok(ModbusResponse::Exception { function, code })) => Err(Error::Rejected {
                reason: format!("modbus exception 0x{code:02x} on function 0x{function:02x}"),
            }),
            _ => Err(Error::Rejected {
                reason: format!("unexpected reply: {}", reply.summary()),
            }),
        }
    }
}

/// Classifies uplinks, releases matching acknowledgment waits, and
/// dispatches an event per uplink.
///
/// Undecodable uplinks are logged and dispatched; they never stop the loop.
pub(crate) async fn process_uplinks(
    mut uplink: mpsc::Receiver<Bytes>,
    classifier: Classifier,
    correlator: Correlator,
    dispatcher: EventDispatcher,
) {
    while let Some(data) = uplink.recv().await {
        tracing::trace!("rx: {}", hex::encode(&data));

        match classifier.classify(&data) {
            Ok(classified) => {
                classified.log();
                correlator.offer(&classified.envelope);
                dispatcher.dispatch(Event::Uplink(Box::new(classified)));
            }
            Err(error) => {
                tracing::warn!(len = data.len(), "dropping undecodable uplink: {}", error);
                dispatcher.dispatch(Event::Undecodable { error, data });
            }
        }
    }
    tracing::debug!("uplink channel closed");
}

impl<T> Drop for DeviceLink<T> {
    fn drop(&mut self) {
        // Abort background tasks
        if let Some(task) = self.process_task.take() {
            task.abort();
        }
    }
}

//! Command handlers for device operations.
//!
//! This module provides high-level command functions that handle
//! the request/response protocol with the device.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::classify::Classified;
use crate::correlation::{AckFilter, AckWaiter, Correlator};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter};
use crate::protocol::{AckStatus, CommandKind, RequestBuilder};
use crate::transport::{Destination, Transport};
use crate::types::{AntennaConfig, ConfigurationSlot, DeviceMode, PortConfig, TargetPort};

/// Default time to wait for a one-shot Modbus response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time to wait for a configuration acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period of repeated one-shot polling.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(20);

/// Command handler for one device.
pub struct CommandHandler<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    correlator: Correlator,
    requests: RequestBuilder,
    destination: Destination,
    timeout: Duration,
}

impl<T: Transport> CommandHandler<T> {
    /// Creates a new command handler addressing `destination`.
    #[must_use]
    pub fn new(
        transport: Arc<Mutex<T>>,
        dispatcher: EventDispatcher,
        correlator: Correlator,
        destination: Destination,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            correlator,
            requests: RequestBuilder::default(),
            destination,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the one-shot response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Replaces the request builder, e.g. to use another codec.
    pub fn set_request_builder(&mut self, requests: RequestBuilder) {
        self.requests = requests;
    }

    /// Returns the addressed device.
    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Returns the request builder.
    #[must_use]
    pub const fn requests(&self) -> &RequestBuilder {
        &self.requests
    }

    /// Sends an encoded command.
    async fn send(&self, data: Bytes) -> Result<()> {
        tracing::trace!(destination = %self.destination, "tx: {}", hex::encode(&data));
        let mut transport = self.transport.lock().await;
        transport.send(&self.destination, data).await
    }

    /// Sends a raw command and waits for an uplink matching `filter`.
    async fn send_and_wait(&self, data: Bytes, filter: &EventFilter) -> Result<Classified> {
        // Subscribe before sending; broadcast only reaches existing receivers.
        let mut subscription = self.dispatcher.subscribe(None);

        self.send(data).await?;

        match subscription.recv_matching(filter, self.timeout).await {
            Some(Event::Uplink(classified)) => Ok(*classified),
            Some(_) | None => Err(Error::ResponseTimeout {
                timeout_ms: Error::millis(self.timeout),
            }),
        }
    }

    /// Arms an acknowledgment wait, then sends a raw command.
    ///
    /// The wait is released again if the send fails.
    async fn send_armed(&self, data: Bytes, filter: AckFilter) -> Result<AckWaiter> {
        // Arm before sending so a fast acknowledgment is not lost.
        let waiter = self.correlator.arm(filter)?;
        self.send(data).await?;
        Ok(waiter)
    }

    // ==================== Device Commands ====================

    /// Restarts the device.
    pub async fn reset(&self) -> Result<()> {
        let data = self.requests.reset()?;
        self.send(data).await
    }

    /// Requests diagnostics. The report arrives as an uplink event.
    pub async fn diagnostics(&self) -> Result<()> {
        let data = self.requests.diagnostics()?;
        self.send(data).await
    }

    /// Switches between Modbus master and sniffer.
    pub async fn set_device_mode(&self, mode: DeviceMode) -> Result<()> {
        let data = self.requests.device_mode(mode)?;
        self.send(data).await
    }

    /// Selects the antenna.
    pub async fn set_antenna_config(&self, antenna: AntennaConfig) -> Result<()> {
        let data = self.requests.antenna_config(antenna)?;
        self.send(data).await
    }

    /// Configures a serial port.
    pub async fn set_port_config(&self, config: PortConfig) -> Result<()> {
        let data = self.requests.port_config(config)?;
        self.send(data).await
    }

    // ==================== Modbus Commands ====================

    /// Sends a one-shot Modbus transaction without waiting.
    ///
    /// The response, if any, arrives as an uplink event.
    pub async fn send_modbus_one_shot(&self, port: TargetPort, frame: Bytes) -> Result<()> {
        let data = self.requests.modbus_one_shot(port, frame)?;
        self.send(data).await
    }

    /// Runs a one-shot Modbus transaction and returns the classified reply.
    ///
    /// A NACK is returned as a reply, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResponseTimeout`] if no reply arrives in time.
    pub async fn modbus_one_shot(&self, port: TargetPort, frame: Bytes) -> Result<Classified> {
        let data = self.requests.modbus_one_shot(port, frame)?;
        self.send_and_wait(data, &EventFilter::reply(CommandKind::ModbusOneShot))
            .await
    }

    /// Sends the periodic job for `slot` with its acknowledgment wait armed.
    ///
    /// The returned waiter resolves on the ACK or NACK for this slot only.
    ///
    /// # Errors
    ///
    /// - [`Error::WaitPending`] if another acknowledgment wait is active
    /// - the transport's error if the send fails
    pub async fn send_slot(&self, slot: &ConfigurationSlot, frame: Bytes) -> Result<AckWaiter> {
        let data = self.requests.slot(slot, frame)?;
        tracing::debug!(slot = %slot.index, interval = slot.interval_secs, "configuring slot");
        self.send_armed(data, AckFilter::slot(slot.index)).await
    }

    /// Installs a periodic job and waits for the device's acknowledgment.
    ///
    /// Telemetry and acknowledgments for other slots do not end the wait.
    ///
    /// # Errors
    ///
    /// - [`Error::WaitPending`] if another acknowledgment wait is active
    /// - the transport's error if the send fails
    /// - [`Error::ResponseTimeout`] if no acknowledgment arrives in time
    /// - [`Error::Cancelled`] if `cancel` fires while waiting
    pub async fn configure_slot(
        &self,
        slot: &ConfigurationSlot,
        frame: Bytes,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AckStatus> {
        self.send_slot(slot, frame).await?.wait(timeout, cancel).await
    }

    /// Repeats a one-shot transaction every `period` until cancelled.
    ///
    /// Send failures are logged and the next period is tried anyway.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command cannot be encoded.
    pub async fn poll(
        &self,
        port: TargetPort,
        frame: Bytes,
        period: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let data = self.requests.modbus_one_shot(port, frame)?;

        loop {
            if let Err(e) = self.send(data.clone()).await {
                tracing::warn!(destination = %self.destination, "cannot send poll request: {}", e);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(period) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::client::process_uplinks;
    use crate::modbus::{ModbusResponse, RtuFrameBuilder, encode_response};
    use crate::protocol::{ResponseEnvelope, WireCodec};
    use crate::transport::{MemoryPeer, MemoryTransport};
    use crate::types::{SlotIndex, slot_table};

    async fn harness() -> (CommandHandler<MemoryTransport>, MemoryPeer) {
        let (mut transport, peer) = MemoryTransport::pair();
        transport.connect().await.unwrap();
        let uplink = transport.take_uplink().unwrap();

        let dispatcher = EventDispatcher::new(64);
        let correlator = Correlator::new();
        tokio::spawn(process_uplinks(
            uplink,
            Classifier::default(),
            correlator.clone(),
            dispatcher.clone(),
        ));

        let handler = CommandHandler::new(
            Arc::new(Mutex::new(transport)),
            dispatcher,
            correlator,
            Destination::new("gw"),
        );
        (handler, peer)
    }

    fn uplink(envelope: &ResponseEnvelope) -> Bytes {
        WireCodec::new().encode_response(envelope).unwrap()
    }

    fn slot_ack(slot: SlotIndex) -> Bytes {
        uplink(&ResponseEnvelope::new(CommandKind::ModbusPeriodic, AckStatus::Ack).with_slot(slot))
    }

    #[tokio::test]
    async fn test_device_commands_are_sent() {
        let (handler, mut peer) = harness().await;

        handler.reset().await.unwrap();
        handler
            .set_port_config(PortConfig::new(TargetPort::Port2, 9600))
            .await
            .unwrap();

        let reset = peer.next_downlink().await.unwrap();
        assert_eq!(reset.destination, Destination::new("gw"));
        assert_eq!(reset.data, handler.requests().reset().unwrap());

        let port = peer.next_downlink().await.unwrap();
        assert_eq!(
            port.data,
            handler
                .requests()
                .port_config(PortConfig::new(TargetPort::Port2, 9600))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_one_shot_reading() {
        let (handler, mut peer) = harness().await;
        let frame = RtuFrameBuilder::default().read_input_registers(0, 2).unwrap();
        let expected = handler
            .requests()
            .modbus_one_shot(TargetPort::Port1, frame.clone())
            .unwrap();

        tokio::spawn(async move {
            let downlink = peer.next_downlink().await.unwrap();
            assert_eq!(downlink.data, expected);

            // An acknowledgment alone is not the reply.
            peer.deliver(uplink(&ResponseEnvelope::new(
                CommandKind::ModbusOneShot,
                AckStatus::Ack,
            )))
            .await
            .unwrap();

            let response =
                encode_response(1, &ModbusResponse::ReadInputRegisters(vec![0x3F80, 0x0000]));
            peer.deliver(uplink(
                &ResponseEnvelope::new(CommandKind::ModbusOneShot, AckStatus::Unknown)
                    .with_modbus_frame(response),
            ))
            .await
            .unwrap();
        });

        let reply = handler
            .modbus_one_shot(TargetPort::Port1, frame)
            .await
            .unwrap();
        assert_eq!(reply.reading, Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_timeout() {
        let (mut handler, _peer) = harness().await;
        handler.set_timeout(Duration::from_secs(2));

        let result = handler
            .modbus_one_shot(TargetPort::Port1, Bytes::from_static(&[1, 4, 0, 0, 0, 2]))
            .await;
        assert!(matches!(
            result,
            Err(Error::ResponseTimeout { timeout_ms: 2000 })
        ));
    }

    #[tokio::test]
    async fn test_configure_slot_ignores_cross_talk() {
        let (handler, mut peer) = harness().await;
        let slot = slot_table(120, TargetPort::Port1)[2];

        tokio::spawn(async move {
            peer.next_downlink().await.unwrap();
            peer.deliver(slot_ack(SlotIndex::new(2).unwrap()))
                .await
                .unwrap();
            peer.deliver(slot_ack(SlotIndex::new(3).unwrap()))
                .await
                .unwrap();
        });

        let status = handler
            .configure_slot(
                &slot,
                Bytes::from_static(&[1, 4, 0, 0x0b, 0, 18]),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(status, AckStatus::Ack);
    }

    #[tokio::test]
    async fn test_configure_slot_send_failure_releases_wait() {
        let (handler, peer) = harness().await;
        let slot = slot_table(120, TargetPort::Port1)[0];
        peer.fail_next_sends(1);

        let result = handler
            .configure_slot(
                &slot,
                Bytes::from_static(&[1, 4, 0, 0, 0, 2]),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(Error::TransportTimeout { .. })));
        assert!(handler.correlator.pending_filter().is_none());
    }

    #[tokio::test]
    async fn test_send_slot_returns_armed_waiter() {
        let (handler, mut peer) = harness().await;
        let slot = slot_table(120, TargetPort::Port1)[4];

        let waiter = handler
            .send_slot(&slot, Bytes::from_static(&[1, 4, 0, 0x20, 0, 2]))
            .await
            .unwrap();
        assert_eq!(waiter.filter(), AckFilter::slot(slot.index));
        assert!(peer.try_downlink().is_some());

        peer.deliver(slot_ack(slot.index)).await.unwrap();
        let status = waiter
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, AckStatus::Ack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_cancelled() {
        let (handler, mut peer) = harness().await;
        let cancel = CancellationToken::new();

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            stop.cancel();
        });

        handler
            .poll(
                TargetPort::Port1,
                Bytes::from_static(&[1, 4, 0, 0, 0, 2]),
                Duration::from_secs(20),
                &cancel,
            )
            .await
            .unwrap();

        let mut sent = 0;
        while peer.try_downlink().is_some() {
            sent += 1;
        }
        assert_eq!(sent, 3);
    }
}

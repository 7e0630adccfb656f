//! Ack-gated provisioning of the periodic polling slots.
//!
//! Slots are configured strictly in order. Each slot's command is sent only
//! after the previous slot was acknowledged; once every slot is in place the
//! sequencer listens until cancelled.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commands::{CommandHandler, DEFAULT_ACK_TIMEOUT};
use crate::error::{Error, Result};
use crate::modbus::{DEFAULT_SLAVE, RtuFrameBuilder};
use crate::protocol::AckStatus;
use crate::transport::Transport;
use crate::types::{ConfigurationSlot, SlotIndex, TargetPort, slot_table};

/// Default polling interval of provisioned slots.
pub const DEFAULT_MODBUS_INTERVAL_SECS: u32 = 120;

/// Configuration for a provisioning batch.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Modbus slave address polled by every slot.
    pub slave: u8,
    /// Serial port the slave sits on.
    pub target_port: TargetPort,
    /// Polling interval in seconds.
    pub interval_secs: u32,
    /// Time allowed for each slot's acknowledgment.
    pub ack_timeout: Duration,
    /// Explicit slot table; the device register map is used when unset.
    pub slots: Option<Vec<ConfigurationSlot>>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            slave: DEFAULT_SLAVE,
            target_port: TargetPort::default(),
            interval_secs: DEFAULT_MODBUS_INTERVAL_SECS,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            slots: None,
        }
    }
}

impl ProvisionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Modbus slave address.
    #[must_use]
    pub const fn slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }

    /// Sets the target port.
    #[must_use]
    pub const fn target_port(mut self, port: TargetPort) -> Self {
        self.target_port = port;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn interval_secs(mut self, secs: u32) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Sets the per-slot acknowledgment timeout.
    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Uses an explicit slot table.
    #[must_use]
    pub fn slots(mut self, slots: Vec<ConfigurationSlot>) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Returns the slots to configure, in order.
    #[must_use]
    pub fn slot_table(&self) -> Vec<ConfigurationSlot> {
        self.slots
            .clone()
            .unwrap_or_else(|| slot_table(self.interval_secs, self.target_port))
    }
}

/// Progress of a provisioning batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    /// Command for the slot is out, acknowledgment pending.
    Sent(SlotIndex),
    /// Slot acknowledged.
    Acked(SlotIndex),
    /// All slots configured; passively receiving.
    Listening,
}

/// Outcome of a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Acknowledged slots, in order.
    pub acked: Vec<SlotIndex>,
}

/// Runs provisioning batches.
#[derive(Debug, Default)]
pub struct Provisioner {
    config: ProvisionConfig,
    progress: Option<mpsc::UnboundedSender<ProvisionState>>,
}

impl Provisioner {
    /// Creates a provisioner.
    #[must_use]
    pub const fn new(config: ProvisionConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    /// Reports every state transition on `tx`.
    #[must_use]
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProvisionState>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    fn notify(&self, state: ProvisionState) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(state);
        }
    }

    /// Configures every slot in order.
    ///
    /// # Errors
    ///
    /// The batch stops at the first failing slot; later slots are never sent.
    ///
    /// - [`Error::ProvisioningTimeout`] if a slot was not acknowledged in time
    /// - [`Error::SlotRejected`] if the device answered with a NACK
    /// - [`Error::SlotSend`] if the command could not be sent
    /// - [`Error::Cancelled`] if `cancel` fired
    pub async fn run<T: Transport>(
        &self,
        commands: &CommandHandler<T>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionReport> {
        let rtu = RtuFrameBuilder::new(self.config.slave);
        let mut report = ProvisionReport::default();

        for slot in self.config.slot_table() {
            let index = slot.index;
            let frame = rtu.read_input_registers(slot.register_address, slot.register_count)?;

            let waiter = match commands.send_slot(&slot, frame).await {
                Ok(waiter) => waiter,
                Err(e) => {
                    let e = slot_error(index, e);
                    tracing::error!(slot = %index, state = "idle", "provisioning aborted: {}", e);
                    return Err(e);
                }
            };
            self.notify(ProvisionState::Sent(index));

            let status = match waiter.wait(self.config.ack_timeout, cancel).await {
                Ok(status) => status,
                Err(e) => {
                    let e = slot_error(index, e);
                    tracing::error!(slot = %index, state = "sent", "provisioning aborted: {}", e);
                    return Err(e);
                }
            };

            if let AckStatus::Nack(reason) = status {
                tracing::error!(slot = %index, reason, "provisioning aborted: slot rejected");
                return Err(Error::SlotRejected {
                    slot: index.get(),
                    reason,
                });
            }

            tracing::info!(slot = %index, "slot acknowledged");
            self.notify(ProvisionState::Acked(index));
            report.acked.push(index);
        }

        tracing::info!(slots = report.acked.len(), "provisioning complete");
        Ok(report)
    }

    /// Configures every slot, then listens until cancelled.
    ///
    /// Cancellation during listening is the normal way out and returns the
    /// report.
    ///
    /// # Errors
    ///
    /// Same as [`Provisioner::run`].
    pub async fn run_and_listen<T: Transport>(
        &self,
        commands: &CommandHandler<T>,
        cancel: &CancellationToken,
    ) -> Result<ProvisionReport> {
        let report = self.run(commands, cancel).await?;
        self.notify(ProvisionState::Listening);
        listen(cancel).await;
        Ok(report)
    }
}

fn slot_error(slot: SlotIndex, error: Error) -> Error {
    match error {
        Error::ResponseTimeout { timeout_ms } => Error::ProvisioningTimeout {
            slot: slot.get(),
            timeout_ms,
        },
        e @ (Error::Cancelled | Error::WaitPending | Error::Encode(_)) => e,
        e => Error::SlotSend {
            slot: slot.get(),
            source: Box::new(e),
        },
    }
}

/// Waits until `cancel` fires. Uplinks keep being logged meanwhile.
pub async fn listen(cancel: &CancellationToken) {
    tracing::info!("listening for uplinks");
    cancel.cancelled().await;
    tracing::info!("stopped listening");
}

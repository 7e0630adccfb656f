//! Request builder: one constructor per command.
//!
//! Arguments are typed, so range checks happen when callers build
//! [`DeviceMode`], [`TargetPort`] and friends. The builder only fails when
//! the codec does.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::EncodeError;
use crate::protocol::codec::{ProtocolCodec, WireCodec};
use crate::protocol::command::Command;
use crate::types::{AntennaConfig, ConfigurationSlot, DeviceMode, PortConfig, SlotIndex, TargetPort};

/// Builds encoded downlink payloads.
#[derive(Clone)]
pub struct RequestBuilder {
    codec: Arc<dyn ProtocolCodec>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(Arc::new(WireCodec::new()))
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder").finish_non_exhaustive()
    }
}

impl RequestBuilder {
    /// Creates a builder over the given codec.
    #[must_use]
    pub fn new(codec: Arc<dyn ProtocolCodec>) -> Self {
        Self { codec }
    }

    /// Encodes an arbitrary command.
    pub fn build(&self, command: &Command) -> Result<Bytes, EncodeError> {
        self.codec.encode(command)
    }

    /// Device reboot.
    pub fn reset(&self) -> Result<Bytes, EncodeError> {
        self.build(&Command::Reset)
    }

    /// Diagnostics request.
    pub fn diagnostics(&self) -> Result<Bytes, EncodeError> {
        self.build(&Command::Diagnostics)
    }

    /// Modbus interface mode.
    pub fn device_mode(&self, mode: DeviceMode) -> Result<Bytes, EncodeError> {
        self.build(&Command::SetDeviceMode(mode))
    }

    /// Antenna selection.
    pub fn antenna_config(&self, antenna: AntennaConfig) -> Result<Bytes, EncodeError> {
        self.build(&Command::SetAntennaConfig(antenna))
    }

    /// Serial line settings.
    pub fn port_config(&self, config: PortConfig) -> Result<Bytes, EncodeError> {
        self.build(&Command::SetPortConfig(config))
    }

    /// Single Modbus transaction. `frame` is embedded verbatim.
    pub fn modbus_one_shot(
        &self,
        port: TargetPort,
        frame: impl Into<Bytes>,
    ) -> Result<Bytes, EncodeError> {
        self.build(&Command::ModbusOneShot {
            port,
            frame: frame.into(),
        })
    }

    /// Periodic Modbus job in `slot`. `frame` is embedded verbatim.
    pub fn modbus_periodic(
        &self,
        port: TargetPort,
        slot: SlotIndex,
        interval_secs: u32,
        frame: impl Into<Bytes>,
    ) -> Result<Bytes, EncodeError> {
        self.build(&Command::ModbusPeriodic {
            port,
            slot,
            interval_secs,
            frame: frame.into(),
        })
    }

    /// Periodic job for a configuration slot, polling `frame`.
    pub fn slot(
        &self,
        slot: &ConfigurationSlot,
        frame: impl Into<Bytes>,
    ) -> Result<Bytes, EncodeError> {
        self.modbus_periodic(slot.target_port, slot.index, slot.interval_secs, frame)
    }
}

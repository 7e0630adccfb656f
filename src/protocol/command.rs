//! Vendor protocol commands.
//!
//! Commands are sent to the device to change its configuration or to forward
//! a Modbus request to one of its serial ports. Responses echo the command
//! kind back.

use bytes::Bytes;

use crate::types::{AntennaConfig, DeviceMode, PortConfig, SlotIndex, TargetPort};

/// Command tags shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// Reboot the device.
    Reset = 0x01,
    /// Request diagnostics.
    Diagnostics = 0x02,
    /// Set the Modbus interface mode.
    SetDeviceMode = 0x03,
    /// Select the antenna.
    SetAntennaConfig = 0x04,
    /// Configure a serial port.
    SetPortConfig = 0x05,
    /// Forward a single Modbus request.
    ModbusOneShot = 0x06,
    /// Install a periodic Modbus request in a slot.
    ModbusPeriodic = 0x07,
}

impl CommandKind {
    /// Parses a command kind from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Reset),
            0x02 => Some(Self::Diagnostics),
            0x03 => Some(Self::SetDeviceMode),
            0x04 => Some(Self::SetAntennaConfig),
            0x05 => Some(Self::SetPortConfig),
            0x06 => Some(Self::ModbusOneShot),
            0x07 => Some(Self::ModbusPeriodic),
            _ => None,
        }
    }

    /// Returns true if responses of this kind carry a Modbus frame.
    #[must_use]
    pub const fn carries_modbus(self) -> bool {
        matches!(self, Self::ModbusOneShot | Self::ModbusPeriodic)
    }
}

/// A fully specified downlink command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reboot the device.
    Reset,
    /// Request diagnostics.
    Diagnostics,
    /// Set the Modbus interface mode.
    SetDeviceMode(DeviceMode),
    /// Select the antenna.
    SetAntennaConfig(AntennaConfig),
    /// Configure a serial port.
    SetPortConfig(PortConfig),
    /// Forward one Modbus RTU request to `port`.
    ModbusOneShot {
        /// Serial port the slave sits on.
        port: TargetPort,
        /// Complete RTU request frame, CRC included.
        frame: Bytes,
    },
    /// Poll `frame` on `port` every `interval_secs`, stored in `slot`.
    ModbusPeriodic {
        /// Serial port the slave sits on.
        port: TargetPort,
        /// Slot the job is stored in.
        slot: SlotIndex,
        /// Polling interval in seconds.
        interval_secs: u32,
        /// Complete RTU request frame, CRC included.
        frame: Bytes,
    },
}

impl Command {
    /// Returns the command kind.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Reset => CommandKind::Reset,
            Self::Diagnostics => CommandKind::Diagnostics,
            Self::SetDeviceMode(_) => CommandKind::SetDeviceMode,
            Self::SetAntennaConfig(_) => CommandKind::SetAntennaConfig,
            Self::SetPortConfig(_) => CommandKind::SetPortConfig,
            Self::ModbusOneShot { .. } => CommandKind::ModbusOneShot,
            Self::ModbusPeriodic { .. } => CommandKind::ModbusPeriodic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for byte in 0x01..=0x07 {
            let kind = CommandKind::from_byte(byte).unwrap();
            assert_eq!(kind as u8, byte);
        }
        assert_eq!(CommandKind::from_byte(0x00), None);
        assert_eq!(CommandKind::from_byte(0x42), None);
    }

    #[test]
    fn test_carries_modbus() {
        assert!(CommandKind::ModbusOneShot.carries_modbus());
        assert!(CommandKind::ModbusPeriodic.carries_modbus());
        assert!(!CommandKind::Diagnostics.carries_modbus());
        assert_eq!(
            Command::SetDeviceMode(DeviceMode::ModbusMaster).kind(),
            CommandKind::SetDeviceMode
        );
    }
}

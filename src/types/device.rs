//! Device configuration types.
//!
//! Each type only admits values the device accepts, so commands built from
//! them never need re-validation.

use std::fmt;

use crate::error::Error;

/// Operating mode of the Modbus interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceMode {
    /// Device polls slaves on its serial ports.
    ModbusMaster = 0,
    /// Device passively records bus traffic.
    ModbusSniffer = 1,
}

impl TryFrom<u8> for DeviceMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ModbusMaster),
            1 => Ok(Self::ModbusSniffer),
            _ => Err(Error::InvalidArgument {
                reason: format!("device mode must be 0 or 1, got {value}"),
            }),
        }
    }
}

/// Radio antenna selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AntennaConfig {
    /// On-board antenna.
    Internal = 0,
    /// External antenna connector.
    External = 1,
}

impl TryFrom<u8> for AntennaConfig {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::External),
            _ => Err(Error::InvalidArgument {
                reason: format!("antenna config must be 0 or 1, got {value}"),
            }),
        }
    }
}

/// Serial port on the device that a Modbus frame is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TargetPort {
    /// Port 1.
    #[default]
    Port1 = 1,
    /// Port 2.
    Port2 = 2,
}

impl TryFrom<u8> for TargetPort {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Port1),
            2 => Ok(Self::Port2),
            _ => Err(Error::InvalidArgument {
                reason: format!("target port must be 1 or 2, got {value}"),
            }),
        }
    }
}

impl fmt::Display for TargetPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", *self as u8)
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None = 0,
    /// Odd parity.
    Odd = 1,
    /// Even parity.
    Even = 2,
}

impl TryFrom<u8> for Parity {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Odd),
            2 => Ok(Self::Even),
            _ => Err(Error::InvalidArgument {
                reason: format!("parity must be 0 (none), 1 (odd) or 2 (even), got {value}"),
            }),
        }
    }
}

/// Serial stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One = 1,
    /// Two stop bits.
    Two = 2,
}

impl TryFrom<u8> for StopBits {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(Error::InvalidArgument {
                reason: format!("stop bits must be 1 or 2, got {value}"),
            }),
        }
    }
}

/// Serial line settings for one device port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Port being configured.
    pub port: TargetPort,
    /// Baud rate.
    pub baudrate: u32,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
}

impl PortConfig {
    /// Creates a port configuration with 8N1 framing.
    #[must_use]
    pub const fn new(port: TargetPort, baudrate: u32) -> Self {
        Self {
            port,
            baudrate,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }

    /// Sets the parity.
    #[must_use]
    pub const fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the stop bits.
    #[must_use]
    pub const fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

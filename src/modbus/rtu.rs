//! Modbus RTU request frames.
//!
//! ```text
//! ┌─────────┬──────────┬──────────────┬──────────────┐
//! │  slave  │ function │     data     │   crc (LE)   │
//! │ 1 byte  │  1 byte  │   n bytes    │   2 bytes    │
//! └─────────┴──────────┴──────────────┴──────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::modbus::crc::crc16;

/// Default slave address.
pub const DEFAULT_SLAVE: u8 = 1;

/// Maximum registers per read request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per read request.
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum registers per write-multiple request.
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Modbus function codes used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read coils.
    ReadCoils = 0x01,
    /// Read holding registers.
    ReadHoldingRegisters = 0x03,
    /// Read input registers.
    ReadInputRegisters = 0x04,
    /// Write single coil.
    WriteSingleCoil = 0x05,
    /// Write multiple registers.
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Parses a function code from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ReadCoils),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Appends the CRC and freezes the frame.
fn seal(mut buf: BytesMut) -> Bytes {
    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    buf.freeze()
}

fn check_quantity(what: &str, count: u16, max: u16) -> Result<()> {
    if count == 0 || count > max {
        return Err(Error::InvalidArgument {
            reason: format!("{what} count must be 1..={max}, got {count}"),
        });
    }
    Ok(())
}

/// Builds RTU request frames addressed to one slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuFrameBuilder {
    slave: u8,
}

impl Default for RtuFrameBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SLAVE)
    }
}

impl RtuFrameBuilder {
    /// Creates a builder for the given slave address.
    #[must_use]
    pub const fn new(slave: u8) -> Self {
        Self { slave }
    }

    /// Returns the slave address.
    #[must_use]
    pub const fn slave(&self) -> u8 {
        self.slave
    }

    fn read(&self, function: FunctionCode, address: u16, count: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u8(self.slave);
        buf.put_u8(function as u8);
        buf.put_u16(address);
        buf.put_u16(count);
        seal(buf)
    }

    /// Read `count` input registers starting at `address`.
    pub fn read_input_registers(&self, address: u16, count: u16) -> Result<Bytes> {
        check_quantity("register", count, MAX_READ_REGISTERS)?;
        Ok(self.read(FunctionCode::ReadInputRegisters, address, count))
    }

    /// Read `count` holding registers starting at `address`.
    pub fn read_holding_registers(&self, address: u16, count: u16) -> Result<Bytes> {
        check_quantity("register", count, MAX_READ_REGISTERS)?;
        Ok(self.read(FunctionCode::ReadHoldingRegisters, address, count))
    }

    /// Read `count` coils starting at `address`.
    pub fn read_coils(&self, address: u16, count: u16) -> Result<Bytes> {
        check_quantity("coil", count, MAX_READ_COILS)?;
        Ok(self.read(FunctionCode::ReadCoils, address, count))
    }

    /// Switch one coil.
    #[must_use]
    pub fn write_single_coil(&self, address: u16, on: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u8(self.slave);
        buf.put_u8(FunctionCode::WriteSingleCoil as u8);
        buf.put_u16(address);
        buf.put_u16(if on { 0xFF00 } else { 0x0000 });
        seal(buf)
    }

    /// Write consecutive holding registers starting at `address`.
    pub fn write_multiple_registers(&self, address: u16, values: &[u16]) -> Result<Bytes> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(Error::InvalidArgument {
                reason: format!(
                    "register count must be 1..={MAX_WRITE_REGISTERS}, got {}",
                    values.len()
                ),
            });
        }
        let count = values.len() as u16;

        let mut buf = BytesMut::with_capacity(9 + values.len() * 2);
        buf.put_u8(self.slave);
        buf.put_u8(FunctionCode::WriteMultipleRegisters as u8);
        buf.put_u16(address);
        buf.put_u16(count);
        buf.put_u8((count * 2) as u8);
        for value in values {
            buf.put_u16(*value);
        }
        Ok(seal(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_input_registers() {
        let frame = RtuFrameBuilder::new(1).read_input_registers(0, 2).unwrap();
        assert_eq!(&frame[..], &[0x01, 0x04, 0x00, 0x00, 0x00, 0x02, 0x71, 0xCB]);
    }

    #[test]
    fn test_read_holding_registers() {
        let frame = RtuFrameBuilder::new(0x11)
            .read_holding_registers(0x006B, 3)
            .unwrap();
        assert_eq!(&frame[..6], &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(crc16(&frame[..6]).to_le_bytes(), [frame[6], frame[7]]);
    }

    #[test]
    fn test_write_single_coil() {
        let builder = RtuFrameBuilder::default();
        let on = builder.write_single_coil(2, true);
        assert_eq!(&on[..6], &[0x01, 0x05, 0x00, 0x02, 0xFF, 0x00]);
        let off = builder.write_single_coil(2, false);
        assert_eq!(&off[4..6], &[0x00, 0x00]);
    }

    #[test]
    fn test_write_multiple_registers() {
        let frame = RtuFrameBuilder::new(1)
            .write_multiple_registers(0, &[0x0041, 0x0042])
            .unwrap();
        assert_eq!(
            &frame[..11],
            &[0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x41, 0x00, 0x42]
        );
        assert_eq!(frame.len(), 13);
    }

    #[test]
    fn test_quantity_limits() {
        let builder = RtuFrameBuilder::default();
        assert!(builder.read_input_registers(0, 0).is_err());
        assert!(builder.read_input_registers(0, 126).is_err());
        assert!(builder.read_coils(0, 2001).is_err());
        assert!(builder.write_multiple_registers(0, &[]).is_err());
        assert!(builder.write_multiple_registers(0, &[0; 124]).is_err());
    }
}

//! Binary encoding of commands and responses.
//!
//! [`ProtocolCodec`] is the seam to the vendor protocol. [`WireCodec`] is the
//! built-in implementation with the following layout (all integers LE):
//!
//! ```text
//! downlink: [version:1] [cmd:1] [body]
//!   SetDeviceMode     [mode:1]
//!   SetAntennaConfig  [antenna:1]
//!   SetPortConfig     [port:1] [baud:4] [parity:1] [stop_bits:1]
//!   ModbusOneShot     [port:1] [len:2] [rtu frame]
//!   ModbusPeriodic    [port:1] [slot:1] [interval:4] [len:2] [rtu frame]
//!
//! uplink:   [version:1] [cmd:1] [ack:1] ([reason:4] if nack)
//!           [slot:1, 0 = none] [len:2] [data]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};
use crate::protocol::command::{Command, CommandKind};
use crate::protocol::envelope::{AckStatus, ResponseEnvelope};
use crate::types::SlotIndex;

/// Protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Maximum embedded frame / data length.
pub const MAX_DATA_LEN: usize = u16::MAX as usize;

/// Uplink header: version, command, ack, slot, length.
const MIN_UPLINK_LEN: usize = 6;

const ACK_UNKNOWN: u8 = 0x00;
const ACK_ACK: u8 = 0x01;
const ACK_NACK: u8 = 0x02;

/// Encode/decode primitive of the vendor protocol.
pub trait ProtocolCodec: Send + Sync {
    /// Encodes a command into a downlink payload.
    fn encode(&self, command: &Command) -> Result<Bytes, EncodeError>;

    /// Decodes an uplink payload.
    fn decode(&self, data: &[u8]) -> Result<ResponseEnvelope, DecodeError>;
}

/// Built-in codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl WireCodec {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encodes an uplink record. Used by device simulators and tests.
    pub fn encode_response(&self, envelope: &ResponseEnvelope) -> Result<Bytes, EncodeError> {
        let data: &[u8] = envelope
            .modbus_frame
            .as_deref()
            .unwrap_or(&envelope.payload[..]);
        let len = data_len(data)?;

        let mut buf = BytesMut::with_capacity(MIN_UPLINK_LEN + 4 + data.len());
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(envelope.kind as u8);
        match envelope.ack {
            AckStatus::Unknown => buf.put_u8(ACK_UNKNOWN),
            AckStatus::Ack => buf.put_u8(ACK_ACK),
            AckStatus::Nack(reason) => {
                buf.put_u8(ACK_NACK);
                buf.put_u32_le(reason);
            }
        }
        buf.put_u8(envelope.slot.map_or(0, SlotIndex::get));
        buf.put_u16_le(len);
        buf.put_slice(data);
        Ok(buf.freeze())
    }
}

fn data_len(data: &[u8]) -> Result<u16, EncodeError> {
    u16::try_from(data.len()).map_err(|_| EncodeError::FrameTooLarge {
        size: data.len(),
        max: MAX_DATA_LEN,
    })
}

fn modbus_frame_len(frame: &[u8]) -> Result<u16, EncodeError> {
    if frame.is_empty() {
        return Err(EncodeError::EmptyFrame);
    }
    data_len(frame)
}

impl ProtocolCodec for WireCodec {
    fn encode(&self, command: &Command) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(command.kind() as u8);

        match command {
            Command::Reset | Command::Diagnostics => {}
            Command::SetDeviceMode(mode) => buf.put_u8(*mode as u8),
            Command::SetAntennaConfig(antenna) => buf.put_u8(*antenna as u8),
            Command::SetPortConfig(cfg) => {
                buf.put_u8(cfg.port as u8);
                buf.put_u32_le(cfg.baudrate);
                buf.put_u8(cfg.parity as u8);
                buf.put_u8(cfg.stop_bits as u8);
            }
            Command::ModbusOneShot { port, frame } => {
                let len = modbus_frame_len(frame)?;
                buf.reserve(3 + frame.len());
                buf.put_u8(*port as u8);
                buf.put_u16_le(len);
                buf.put_slice(frame);
            }
            Command::ModbusPeriodic {
                port,
                slot,
                interval_secs,
                frame,
            } => {
                let len = modbus_frame_len(frame)?;
                buf.reserve(8 + frame.len());
                buf.put_u8(*port as u8);
                buf.put_u8(slot.get());
                buf.put_u32_le(*interval_secs);
                buf.put_u16_le(len);
                buf.put_slice(frame);
            }
        }

        Ok(buf.freeze())
    }

    fn decode(&self, data: &[u8]) -> Result<ResponseEnvelope, DecodeError> {
        if data.len() < MIN_UPLINK_LEN {
            return Err(DecodeError::TooShort {
                need: MIN_UPLINK_LEN,
                got: data.len(),
            });
        }

        let mut cursor = data;

        let version = cursor.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let cmd = cursor.get_u8();
        let kind = CommandKind::from_byte(cmd).ok_or(DecodeError::UnknownCommand(cmd))?;

        let ack = match cursor.get_u8() {
            ACK_UNKNOWN => AckStatus::Unknown,
            ACK_ACK => AckStatus::Ack,
            ACK_NACK => {
                // reason + slot + len
                if cursor.remaining() < 7 {
                    return Err(DecodeError::TooShort {
                        need: MIN_UPLINK_LEN + 4,
                        got: data.len(),
                    });
                }
                AckStatus::Nack(cursor.get_u32_le())
            }
            other => return Err(DecodeError::UnknownAck(other)),
        };

        let slot = match cursor.get_u8() {
            0 => None,
            raw => Some(SlotIndex::new(raw).ok_or(DecodeError::InvalidSlot(raw))?),
        };

        let len = usize::from(cursor.get_u16_le());
        if cursor.remaining() < len {
            return Err(DecodeError::Truncated {
                expected: len,
                got: cursor.remaining(),
            });
        }
        let body = Bytes::copy_from_slice(&cursor[..len]);

        let (modbus_frame, payload) = if kind.carries_modbus() {
            ((!body.is_empty()).then_some(body), Bytes::new())
        } else {
            (None, body)
        };

        Ok(ResponseEnvelope {
            kind,
            ack,
            modbus_frame,
            slot,
            payload,
        })
    }
}

//! Modbus RTU response decoding.

use std::fmt;

use crate::error::DecodeError;
use crate::modbus::crc::crc16;
use crate::modbus::rtu::FunctionCode;

/// Slave, function and CRC.
const MIN_RESPONSE_LEN: usize = 5;

/// Decoded response PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    /// Input register values.
    ReadInputRegisters(Vec<u16>),
    /// Holding register values.
    ReadHoldingRegisters(Vec<u16>),
    /// Coil states, padded to whole bytes.
    ReadCoils(Vec<bool>),
    /// Echo of a write-multiple-registers request.
    WriteMultipleRegisters {
        /// First register written.
        address: u16,
        /// Registers written.
        count: u16,
    },
    /// Echo of a write-single-coil request.
    WriteSingleCoil {
        /// Coil address.
        address: u16,
        /// New coil state.
        on: bool,
    },
    /// Slave reported an exception.
    Exception {
        /// Function that failed.
        function: u8,
        /// Exception code.
        code: u8,
    },
}

impl ModbusResponse {
    /// Input registers holding exactly one float, if that is what this is.
    #[must_use]
    pub fn float_registers(&self) -> Option<&[u16]> {
        match self {
            Self::ReadInputRegisters(words) if words.len() == 2 => Some(words),
            _ => None,
        }
    }
}

/// Renders registers as one character each, `?` for non-characters.
fn registers_as_text(words: &[u16]) -> String {
    words
        .iter()
        .map(|w| char::from_u32(u32::from(*w)).unwrap_or('?'))
        .collect()
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

impl fmt::Display for ModbusResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadInputRegisters(words) => write!(f, "input registers {words:04x?}"),
            Self::ReadHoldingRegisters(words) => {
                write!(f, "holding registers {:?}", registers_as_text(words))
            }
            Self::ReadCoils(bits) => match bits.first() {
                Some(on) => write!(f, "coil is {}", on_off(*on)),
                None => f.write_str("no coils"),
            },
            Self::WriteMultipleRegisters { count, .. } => write!(f, "wrote {count} registers"),
            Self::WriteSingleCoil { address, on } => {
                write!(f, "coil {address} set to {}", on_off(*on))
            }
            Self::Exception { function, code } => {
                write!(f, "exception 0x{code:02x} on function 0x{function:02x}")
            }
        }
    }
}

/// Decodes a complete RTU response frame, CRC included.
///
/// # Errors
///
/// Returns a [`DecodeError`] for short frames, CRC mismatches, unsupported
/// function codes and inconsistent byte counts.
pub fn decode_response(frame: &[u8]) -> Result<ModbusResponse, DecodeError> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(DecodeError::TooShort {
            need: MIN_RESPONSE_LEN,
            got: frame.len(),
        });
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed = crc16(body);
    if received != computed {
        return Err(DecodeError::Crc { received, computed });
    }

    let function = body[1];
    let data = &body[2..];

    if function & 0x80 != 0 {
        return Ok(ModbusResponse::Exception {
            function: function & 0x7F,
            code: data[0],
        });
    }

    match FunctionCode::from_byte(function) {
        Some(FunctionCode::ReadCoils) => {
            let bytes = counted(data)?;
            let bits = bytes
                .iter()
                .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
                .collect();
            Ok(ModbusResponse::ReadCoils(bits))
        }
        Some(FunctionCode::ReadHoldingRegisters) => {
            Ok(ModbusResponse::ReadHoldingRegisters(words(data)?))
        }
        Some(FunctionCode::ReadInputRegisters) => {
            Ok(ModbusResponse::ReadInputRegisters(words(data)?))
        }
        Some(FunctionCode::WriteSingleCoil) => {
            let (address, value) = echo(data)?;
            Ok(ModbusResponse::WriteSingleCoil {
                address,
                on: value == 0xFF00,
            })
        }
        Some(FunctionCode::WriteMultipleRegisters) => {
            let (address, count) = echo(data)?;
            Ok(ModbusResponse::WriteMultipleRegisters { address, count })
        }
        None => Err(DecodeError::UnknownFunction(function)),
    }
}

/// Splits `[byte_count] [bytes]`, checking the count.
fn counted(data: &[u8]) -> Result<&[u8], DecodeError> {
    let count = data[0];
    let rest = &data[1..];
    if rest.len() != usize::from(count) {
        return Err(DecodeError::Truncated {
            expected: usize::from(count),
            got: rest.len(),
        });
    }
    Ok(rest)
}

fn words(data: &[u8]) -> Result<Vec<u16>, DecodeError> {
    let bytes = counted(data)?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::ByteCount(data[0]));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

fn echo(data: &[u8]) -> Result<(u16, u16), DecodeError> {
    if data.len() != 4 {
        return Err(DecodeError::Truncated {
            expected: 4,
            got: data.len(),
        });
    }
    Ok((
        u16::from_be_bytes([data[0], data[1]]),
        u16::from_be_bytes([data[2], data[3]]),
    ))
}

/// Builds an RTU response frame. Used by device simulators and tests.
#[must_use]
pub fn encode_response(slave: u8, response: &ModbusResponse) -> Vec<u8> {
    let mut frame = vec![slave];
    match response {
        ModbusResponse::ReadInputRegisters(words) | ModbusResponse::ReadHoldingRegisters(words) => {
            let function = if matches!(response, ModbusResponse::ReadInputRegisters(_)) {
                FunctionCode::ReadInputRegisters
            } else {
                FunctionCode::ReadHoldingRegisters
            };
            frame.push(function as u8);
            frame.push((words.len() * 2) as u8);
            frame.extend(words.iter().flat_map(|w| w.to_be_bytes()));
        }
        ModbusResponse::ReadCoils(bits) => {
            frame.push(FunctionCode::ReadCoils as u8);
            let packed: Vec<u8> = bits
                .chunks(8)
                .map(|chunk| {
                    chunk
                        .iter()
                        .enumerate()
                        .fold(0u8, |acc, (i, on)| acc | (u8::from(*on) << i))
                })
                .collect();
            frame.push(packed.len() as u8);
            frame.extend(packed);
        }
        ModbusResponse::WriteSingleCoil { address, on } => {
            frame.push(FunctionCode::WriteSingleCoil as u8);
            frame.extend(address.to_be_bytes());
            frame.extend(if *on { [0xFF, 0x00] } else { [0x00, 0x00] });
        }
        ModbusResponse::WriteMultipleRegisters { address, count } => {
            frame.push(FunctionCode::WriteMultipleRegisters as u8);
            frame.extend(address.to_be_bytes());
            frame.extend(count.to_be_bytes());
        }
        ModbusResponse::Exception { function, code } => {
            frame.push(function | 0x80);
            frame.push(*code);
        }
    }
    let crc = crc16(&frame);
    frame.extend(crc.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend(crc16(body).to_le_bytes());
        frame
    }

    #[test]
    fn test_decode_input_registers() {
        let frame = with_crc(&[0x01, 0x04, 0x04, 0x00, 0x00, 0x3F, 0x80]);
        assert_eq!(
            decode_response(&frame).unwrap(),
            ModbusResponse::ReadInputRegisters(vec![0x0000, 0x3F80])
        );
    }

    #[test]
    fn test_decode_holding_registers_text() {
        let frame = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x48, 0x00, 0x69]);
        let response = decode_response(&frame).unwrap();
        assert_eq!(response.to_string(), "holding registers \"Hi\"");
        assert_eq!(response.float_registers(), None);
    }

    #[test]
    fn test_decode_coils() {
        let frame = with_crc(&[0x01, 0x01, 0x01, 0x01]);
        let response = decode_response(&frame).unwrap();
        match &response {
            ModbusResponse::ReadCoils(bits) => {
                assert_eq!(bits.len(), 8);
                assert!(bits[0]);
                assert!(!bits[1]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(response.to_string(), "coil is on");
    }

    #[test]
    fn test_decode_write_echoes() {
        let coil = with_crc(&[0x01, 0x05, 0x00, 0x01, 0xFF, 0x00]);
        assert_eq!(
            decode_response(&coil).unwrap(),
            ModbusResponse::WriteSingleCoil {
                address: 1,
                on: true
            }
        );
        let regs = with_crc(&[0x01, 0x10, 0x00, 0x00, 0x00, 0x08]);
        let response = decode_response(&regs).unwrap();
        assert_eq!(response.to_string(), "wrote 8 registers");
    }

    #[test]
    fn test_decode_exception() {
        let frame = with_crc(&[0x01, 0x84, 0x02]);
        assert_eq!(
            decode_response(&frame).unwrap(),
            ModbusResponse::Exception {
                function: 0x04,
                code: 0x02
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            decode_response(&[0x01, 0x04]),
            Err(DecodeError::TooShort { .. })
        ));

        let mut frame = with_crc(&[0x01, 0x04, 0x02, 0x00, 0x01]);
        frame[3] ^= 0xFF;
        assert!(matches!(
            decode_response(&frame),
            Err(DecodeError::Crc { .. })
        ));

        let unknown = with_crc(&[0x01, 0x2B, 0x00]);
        assert_eq!(
            decode_response(&unknown),
            Err(DecodeError::UnknownFunction(0x2B))
        );

        let short = with_crc(&[0x01, 0x04, 0x04, 0x00, 0x01]);
        assert!(matches!(
            decode_response(&short),
            Err(DecodeError::Truncated { .. })
        ));

        let odd = with_crc(&[0x01, 0x03, 0x03, 0x00, 0x01, 0x02]);
        assert_eq!(decode_response(&odd), Err(DecodeError::ByteCount(3)));
    }

    #[test]
    fn test_encoded_response_decodes() {
        let cases = [
            ModbusResponse::ReadInputRegisters(vec![0x3F80, 0x0000]),
            ModbusResponse::ReadCoils(vec![true, false, false, false, false, false, false, false]),
            ModbusResponse::WriteSingleCoil {
                address: 2,
                on: false,
            },
            ModbusResponse::Exception {
                function: 3,
                code: 1,
            },
        ];
        for case in cases {
            assert_eq!(decode_response(&encode_response(7, &case)).unwrap(), case);
        }
    }
}

//! Modbus RTU framing.
//!
//! Requests are built here and embedded verbatim into vendor commands;
//! responses come back embedded in uplink envelopes and are decoded here.

pub mod crc;
pub mod response;
pub mod rtu;

pub use crc::crc16;
pub use response::{ModbusResponse, decode_response, encode_response};
pub use rtu::{DEFAULT_SLAVE, FunctionCode, RtuFrameBuilder};

//! Vendor command protocol.
//!
//! This module contains the protocol layer wrapped around Modbus frames:
//! - Command definitions and kinds
//! - Decoded response envelopes
//! - The codec seam and its built-in binary implementation
//! - The request builder

pub mod codec;
pub mod command;
pub mod envelope;
pub mod request;

pub use codec::{MAX_DATA_LEN, PROTOCOL_VERSION, ProtocolCodec, WireCodec};
pub use command::{Command, CommandKind};
pub use envelope::{AckStatus, ResponseEnvelope};
pub use request::RequestBuilder;

//! Decoded uplink records.

use std::fmt;

use bytes::Bytes;

use crate::protocol::command::CommandKind;
use crate::types::SlotIndex;

/// Acknowledgment state carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckStatus {
    /// No acknowledgment; the response carries data.
    #[default]
    Unknown,
    /// Command accepted.
    Ack,
    /// Command refused, with a device reason code.
    Nack(u32),
}

impl AckStatus {
    /// Returns true for a rejection.
    #[must_use]
    pub const fn is_rejection(self) -> bool {
        matches!(self, Self::Nack(_))
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("none"),
            Self::Ack => f.write_str("ack"),
            Self::Nack(reason) => write!(f, "nack({reason})"),
        }
    }
}

/// Outer record of one uplink message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// Command the response belongs to.
    pub kind: CommandKind,
    /// Acknowledgment state.
    pub ack: AckStatus,
    /// Raw Modbus RTU response, for Modbus-carrying kinds.
    pub modbus_frame: Option<Bytes>,
    /// Periodic slot the response pertains to.
    pub slot: Option<SlotIndex>,
    /// Remaining body bytes of non-Modbus responses (e.g. diagnostics).
    pub payload: Bytes,
}

impl ResponseEnvelope {
    /// Creates an envelope with no body.
    #[must_use]
    pub fn new(kind: CommandKind, ack: AckStatus) -> Self {
        Self {
            kind,
            ack,
            modbus_frame: None,
            slot: None,
            payload: Bytes::new(),
        }
    }

    /// Sets the slot.
    #[must_use]
    pub fn with_slot(mut self, slot: SlotIndex) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Sets the embedded Modbus frame.
    #[must_use]
    pub fn with_modbus_frame(mut self, frame: impl Into<Bytes>) -> Self {
        self.modbus_frame = Some(frame.into());
        self
    }
}

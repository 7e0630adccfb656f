//! Error types for the meshbus library.

use thiserror::Error;

/// The main error type for meshbus operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Command could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Uplink could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// MQTT client error.
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport did not complete a send in time.
    #[error("send timed out after {timeout_ms}ms")]
    TransportTimeout { timeout_ms: u64 },

    /// The gateway refused the send.
    #[error("gateway rejected send: {reason}")]
    Rejected { reason: String },

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// No acknowledgment for a configuration slot arrived in time.
    #[error("slot {slot} not acknowledged within {timeout_ms}ms")]
    ProvisioningTimeout { slot: u8, timeout_ms: u64 },

    /// The device answered a configuration slot with a NACK.
    #[error("slot {slot} rejected by device (reason {reason})")]
    SlotRejected { slot: u8, reason: u32 },

    /// Sending the configuration for a slot failed.
    #[error("sending slot {slot} failed: {source}")]
    SlotSend {
        slot: u8,
        #[source]
        source: Box<Error>,
    },

    /// No response to a one-shot request arrived in time.
    #[error("no response within {timeout_ms}ms")]
    ResponseTimeout { timeout_ms: u64 },

    /// A correlation wait is already outstanding.
    #[error("an acknowledgment wait is already pending")]
    WaitPending,

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Internal channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Buffer has the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    /// Caller supplied an out-of-range value.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

impl Error {
    /// Milliseconds of a timeout, saturating.
    pub(crate) fn millis(timeout: std::time::Duration) -> u64 {
        u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Mqtt(err.to_string())
    }
}

/// Errors raised while encoding a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Embedded Modbus frame does not fit the length field.
    #[error("modbus frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Modbus frame is empty.
    #[error("modbus frame is empty")]
    EmptyFrame,
}

/// Errors raised while decoding uplink data, at either layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer too short to contain a header.
    #[error("too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    /// Envelope version not understood.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    /// Unknown command tag.
    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    /// Unknown acknowledgment tag.
    #[error("unknown acknowledgment 0x{0:02x}")]
    UnknownAck(u8),

    /// Slot index outside 1..=8.
    #[error("invalid slot index {0}")]
    InvalidSlot(u8),

    /// Declared length exceeds the data available.
    #[error("truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Modbus CRC mismatch.
    #[error("crc mismatch: frame 0x{received:04x}, computed 0x{computed:04x}")]
    Crc { received: u16, computed: u16 },

    /// Modbus function code not supported.
    #[error("unsupported modbus function 0x{0:02x}")]
    UnknownFunction(u8),

    /// Modbus byte count inconsistent with the function.
    #[error("byte count {0} is invalid for this function")]
    ByteCount(u8),
}

/// Result type alias for meshbus operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Layered decoding of uplink messages.
//!
//! Envelope first, then the embedded Modbus frame, then the float reading.
//! A bad Modbus frame is kept as an error on the result; the envelope stays
//! usable for acknowledgment handling.

use std::sync::Arc;

use crate::error::DecodeError;
use crate::modbus::{ModbusResponse, decode_response};
use crate::protocol::{AckStatus, CommandKind, ProtocolCodec, ResponseEnvelope, WireCodec};
use crate::types::registers_to_f32;

/// Result of classifying one uplink message.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    /// Outer record.
    pub envelope: ResponseEnvelope,
    /// Decoded embedded Modbus response, when one was present.
    pub modbus: Option<Result<ModbusResponse, DecodeError>>,
    /// Float reconstructed from a two-register input read.
    pub reading: Option<f32>,
}

impl Classified {
    /// Returns the decoded Modbus response, if decoding succeeded.
    #[must_use]
    pub fn response(&self) -> Option<&ModbusResponse> {
        self.modbus.as_ref().and_then(|r| r.as_ref().ok())
    }

    /// Human-readable one-line description.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(value) = self.reading {
            return format!("measurement {value}");
        }
        match (&self.modbus, self.envelope.ack) {
            (Some(Ok(response)), _) => response.to_string(),
            (Some(Err(e)), _) => format!("undecodable modbus frame: {e}"),
            (None, AckStatus::Ack) => format!("{:?} acknowledged", self.envelope.kind),
            (None, AckStatus::Nack(reason)) => {
                format!("{:?} rejected (reason {reason})", self.envelope.kind)
            }
            (None, AckStatus::Unknown) if !self.envelope.payload.is_empty() => format!(
                "{:?} payload {}",
                self.envelope.kind,
                hex::encode(&self.envelope.payload)
            ),
            (None, AckStatus::Unknown) => format!("{:?} response", self.envelope.kind),
        }
    }

    /// Logs the message at a level matching its content.
    pub fn log(&self) {
        let slot = self.envelope.slot.map(|s| s.get());
        let kind = self.envelope.kind;
        if let Some(value) = self.reading {
            tracing::info!(?kind, ?slot, value, "measurement");
            return;
        }
        match (&self.modbus, self.envelope.ack) {
            (Some(Err(e)), _) => {
                tracing::warn!(?kind, ?slot, "undecodable modbus frame: {}", e);
            }
            (_, AckStatus::Nack(reason)) => {
                tracing::warn!(?kind, ?slot, reason, "command rejected");
            }
            (_, AckStatus::Ack) if kind == CommandKind::ModbusPeriodic => {
                tracing::info!(?slot, "configuration added");
            }
            _ => tracing::info!(?kind, ?slot, "{}", self.summary()),
        }
    }
}

/// Decodes uplinks through the protocol codec and the Modbus decoder.
#[derive(Clone)]
pub struct Classifier {
    codec: Arc<dyn ProtocolCodec>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Arc::new(WireCodec::new()))
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").finish_non_exhaustive()
    }
}

impl Classifier {
    /// Creates a classifier over the given codec.
    #[must_use]
    pub fn new(codec: Arc<dyn ProtocolCodec>) -> Self {
        Self { codec }
    }

    /// Classifies one raw uplink payload.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`DecodeError`] if the envelope itself cannot be
    /// decoded. Errors in the embedded Modbus frame are reported inside the
    /// returned [`Classified`].
    pub fn classify(&self, data: &[u8]) -> Result<Classified, DecodeError> {
        let envelope = self.codec.decode(data)?;

        let modbus = match &envelope.modbus_frame {
            Some(frame) if envelope.kind.carries_modbus() && !envelope.ack.is_rejection() => {
                Some(decode_response(frame))
            }
            _ => None,
        };

        let reading = modbus
            .as_ref()
            .and_then(|r| r.as_ref().ok())
            .and_then(ModbusResponse::float_registers)
            .and_then(|words| registers_to_f32(words).ok());

        Ok(Classified {
            envelope,
            modbus,
            reading,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::encode_response;
    use crate::types::SlotIndex;

    fn uplink(envelope: &ResponseEnvelope) -> Vec<u8> {
        WireCodec::new().encode_response(envelope).unwrap().to_vec()
    }

    fn telemetry(slot: u8, registers: Vec<u16>) -> Vec<u8> {
        let frame = encode_response(1, &ModbusResponse::ReadInputRegisters(registers));
        uplink(
            &ResponseEnvelope::new(CommandKind::ModbusPeriodic, AckStatus::Unknown)
                .with_slot(SlotIndex::new(slot).unwrap())
                .with_modbus_frame(frame),
        )
    }

    #[test]
    fn test_reading_from_two_registers() {
        let classified = Classifier::default()
            .classify(&telemetry(1, vec![0x3F80, 0x0000]))
            .unwrap();
        assert_eq!(classified.reading, Some(1.0));
        assert_eq!(classified.envelope.slot, SlotIndex::new(1));
        assert_eq!(classified.summary(), "measurement 1");
    }

    #[test]
    fn test_no_reading_for_other_counts() {
        let classified = Classifier::default()
            .classify(&telemetry(3, vec![0; 18]))
            .unwrap();
        assert_eq!(classified.reading, None);
        assert!(matches!(
            classified.response(),
            Some(ModbusResponse::ReadInputRegisters(words)) if words.len() == 18
        ));
    }

    #[test]
    fn test_ack_has_no_modbus() {
        let data = uplink(
            &ResponseEnvelope::new(CommandKind::ModbusPeriodic, AckStatus::Ack)
                .with_slot(SlotIndex::new(2).unwrap()),
        );
        let classified = Classifier::default().classify(&data).unwrap();
        assert_eq!(classified.envelope.ack, AckStatus::Ack);
        assert!(classified.modbus.is_none());
        assert_eq!(classified.summary(), "ModbusPeriodic acknowledged");
    }

    #[test]
    fn test_nack_skips_modbus_decode() {
        let data = uplink(
            &ResponseEnvelope::new(CommandKind::ModbusOneShot, AckStatus::Nack(3))
                .with_modbus_frame(vec![0xDE, 0xAD]),
        );
        let classified = Classifier::default().classify(&data).unwrap();
        assert!(classified.modbus.is_none());
        assert_eq!(classified.summary(), "ModbusOneShot rejected (reason 3)");
    }

    #[test]
    fn test_bad_modbus_keeps_envelope() {
        let data = uplink(
            &ResponseEnvelope::new(CommandKind::ModbusOneShot, AckStatus::Unknown)
                .with_modbus_frame(vec![0x01, 0x04, 0x02, 0x00, 0x00, 0x00, 0x00]),
        );
        let classified = Classifier::default().classify(&data).unwrap();
        assert_eq!(classified.envelope.kind, CommandKind::ModbusOneShot);
        assert!(matches!(classified.modbus, Some(Err(DecodeError::Crc { .. }))));
        assert_eq!(classified.reading, None);
    }

    #[test]
    fn test_envelope_error() {
        assert!(Classifier::default().classify(&[0xFF]).is_err());
    }

    #[test]
    fn test_classification_is_idempotent() {
        let classifier = Classifier::default();
        let data = telemetry(1, vec![0x4366, 0x8000]);
        let first = classifier.classify(&data).unwrap();
        let second = classifier.classify(&data).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.reading, Some(230.5));
    }
}

//! Float reconstruction from register pairs.
//!
//! The measurement device stores each `f32` across two input registers.
//! Registers are serialized low byte first (`[b0, b1]` for the first word,
//! `[b2, b3]` for the second) and the value is recovered by reading
//! `[b2, b3, b0, b1]` as a little-endian float.

use crate::error::{Error, Result};

/// Bytes in one reconstructed value.
pub const FLOAT_BYTES: usize = 4;

/// Serializes register words low byte first.
#[must_use]
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_le_bytes()).collect()
}

/// Reconstructs a float from exactly four register bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidLength`] unless `data` is four bytes long.
pub fn word_swapped_f32(data: &[u8]) -> Result<f32> {
    let &[b0, b1, b2, b3] = data else {
        return Err(Error::InvalidLength {
            expected: FLOAT_BYTES,
            got: data.len(),
        });
    };
    Ok(f32::from_le_bytes([b2, b3, b0, b1]))
}

/// Reconstructs a float from a two-register reading.
///
/// # Errors
///
/// Returns [`Error::InvalidLength`] unless exactly two registers are given.
pub fn registers_to_f32(registers: &[u16]) -> Result<f32> {
    word_swapped_f32(&registers_to_bytes(registers))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Independent decoder: first register is the high word.
    fn reference(data: [u8; 4]) -> f32 {
        let hi = u32::from(u16::from_le_bytes([data[0], data[1]]));
        let lo = u32::from(u16::from_le_bytes([data[2], data[3]]));
        f32::from_bits((hi << 16) | lo)
    }

    #[test]
    fn test_one() {
        assert_eq!(word_swapped_f32(&[0x80, 0x3F, 0x00, 0x00]).unwrap(), 1.0);
        assert_eq!(registers_to_f32(&[0x3F80, 0x0000]).unwrap(), 1.0);
    }

    #[test]
    fn test_reorder() {
        // 230.5 V = 0x43668000
        assert_eq!(registers_to_f32(&[0x4366, 0x8000]).unwrap(), 230.5);
        assert_eq!(registers_to_bytes(&[0x4366, 0x8000]), [0x66, 0x43, 0x00, 0x80]);
    }

    #[test]
    fn test_matches_reference() {
        let samples: [[u8; 4]; 6] = [
            [0, 0, 0, 0],
            [0x80, 0x3F, 0, 0],
            [0x49, 0x40, 0xDB, 0x0F],
            [0xFF, 0xFF, 0xFF, 0xFF],
            [0x00, 0x80, 0x00, 0x00],
            [0x12, 0x34, 0x56, 0x78],
        ];
        for sample in samples {
            let got = word_swapped_f32(&sample).unwrap();
            let want = reference(sample);
            assert_eq!(got.to_bits(), want.to_bits(), "sample {sample:02x?}");
        }
        for b in 0..=u8::MAX {
            let sample = [b, b.wrapping_mul(7), b.wrapping_add(3), !b];
            assert_eq!(
                word_swapped_f32(&sample).unwrap().to_bits(),
                reference(sample).to_bits()
            );
        }
    }

    #[test]
    fn test_invalid_length() {
        assert!(matches!(
            word_swapped_f32(&[0x00, 0x01, 0x02]),
            Err(Error::InvalidLength {
                expected: 4,
                got: 3
            })
        ));
        assert!(word_swapped_f32(&[0; 5]).is_err());
        assert!(word_swapped_f32(&[]).is_err());
        assert!(registers_to_f32(&[1, 2, 3]).is_err());
    }
}

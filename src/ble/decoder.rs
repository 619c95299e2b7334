//! Heart Rate Measurement (0x2A37) payload decoding.
//!
//! Byte 0 is the flags field. Bit 0 selects the value format: clear for a
//! UINT8 in byte 1, set for a little-endian UINT16 in bytes 1..=2. Trailing
//! fields (energy expended, RR intervals) are ignored.

use thiserror::Error;

/// Flags bit selecting the 16-bit value format
const FLAG_VALUE_UINT16: u8 = 0x01;

/// Why a notification payload yielded no heart rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("empty payload")]
    Empty,

    #[error("payload too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("non-positive heart rate")]
    NonPositive,
}

/// Decode a measurement payload, reporting why decoding failed
pub fn try_decode(buffer: &[u8]) -> Result<u16, DecodeFailure> {
    let flags = *buffer.first().ok_or(DecodeFailure::Empty)?;

    if flags & FLAG_VALUE_UINT16 != 0 {
        match buffer {
            [_, lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(DecodeFailure::Truncated {
                needed: 3,
                actual: buffer.len(),
            }),
        }
    } else {
        match buffer {
            [_, value, ..] => Ok(u16::from(*value)),
            _ => Err(DecodeFailure::Truncated {
                needed: 2,
                actual: buffer.len(),
            }),
        }
    }
}

/// Decode a measurement payload. Malformed payloads yield `None`.
pub fn decode(buffer: &[u8]) -> Option<u16> {
    try_decode(buffer).ok()
}

/// Decode a payload into a sample-worthy heart rate, rejecting zero readings
pub fn decode_positive(buffer: &[u8]) -> Result<u16, DecodeFailure> {
    match try_decode(buffer)? {
        0 => Err(DecodeFailure::NonPositive),
        bpm => Ok(bpm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint8_format() {
        assert_eq!(decode(&[0x00, 72]), Some(72));
        assert_eq!(decode(&[0x00, 255]), Some(255));
    }

    #[test]
    fn test_uint16_format() {
        assert_eq!(decode(&[0x01, 44, 0]), Some(44));
        assert_eq!(decode(&[0x01, 0x2C, 0x01]), Some(300));
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(decode(&[]), None);
        assert_eq!(try_decode(&[]), Err(DecodeFailure::Empty));
    }

    #[test]
    fn test_truncated_payloads() {
        assert_eq!(decode(&[0x01, 44]), None);
        assert_eq!(
            try_decode(&[0x01, 44]),
            Err(DecodeFailure::Truncated {
                needed: 3,
                actual: 2
            })
        );
        assert_eq!(decode(&[0x00]), None);
    }

    #[test]
    fn test_other_flag_bits_are_ignored() {
        // Sensor contact + RR intervals present, UINT8 value
        assert_eq!(decode(&[0x16, 65, 0x10, 0x03]), Some(65));
        // Energy expended present, UINT16 value
        assert_eq!(decode(&[0x09, 0x50, 0x00, 0xFF, 0xFF]), Some(80));
    }

    #[test]
    fn test_zero_is_decoded_but_not_positive() {
        assert_eq!(decode(&[0x00, 0]), Some(0));
        assert_eq!(decode_positive(&[0x00, 0]), Err(DecodeFailure::NonPositive));
        assert_eq!(decode_positive(&[0x01, 0, 0]), Err(DecodeFailure::NonPositive));
        assert_eq!(decode_positive(&[0x00, 61]), Ok(61));
    }
}

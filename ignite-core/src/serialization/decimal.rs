//! Arbitrary-precision decimal encoding.
//!
//! The wire form is `scale:i32 | length:i32 | magnitude` where the magnitude
//! is big-endian regardless of the frame byte order and the sign occupies the
//! top bit of the first magnitude byte.

use rust_decimal::Decimal;

use super::{DataInput, DataOutput, ObjectDataInput, ObjectDataOutput};
use crate::error::{IgniteError, Result};

/// Writes the scale, length and signed magnitude of `value`.
pub fn write_decimal(output: &mut ObjectDataOutput, value: &Decimal) -> Result<()> {
    let mantissa = value.mantissa();
    let magnitude = mantissa.unsigned_abs().to_be_bytes();
    let first = magnitude
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(magnitude.len() - 1);

    let mut bytes = Vec::with_capacity(17);
    if magnitude[first] & 0x80 != 0 {
        bytes.push(0);
    }
    bytes.extend_from_slice(&magnitude[first..]);
    if mantissa < 0 {
        bytes[0] |= 0x80;
    }

    output.write_int(value.scale() as i32)?;
    output.write_int(bytes.len() as i32)?;
    output.write_bytes(&bytes)
}

/// Reads a decimal written by [`write_decimal`] or by the server.
pub fn read_decimal(input: &mut ObjectDataInput<'_>) -> Result<Decimal> {
    let scale = input.read_int()?;
    let len = input.read_len()?;
    if len == 0 {
        return Err(IgniteError::Serialization(
            "decimal magnitude must not be empty".to_string(),
        ));
    }
    let mut bytes = input.read_bytes(len)?;
    let negative = bytes[0] & 0x80 != 0;
    bytes[0] &= 0x7F;

    let significant = bytes
        .iter()
        .position(|b| *b != 0)
        .map_or(&bytes[..0], |i| &bytes[i..]);
    if significant.len() > 16 {
        return Err(IgniteError::Serialization(format!(
            "decimal magnitude of {} bytes exceeds supported precision",
            significant.len()
        )));
    }
    let mut buf = [0u8; 16];
    buf[16 - significant.len()..].copy_from_slice(significant);
    let magnitude = u128::from_be_bytes(buf);
    let mut mantissa = i128::try_from(magnitude).map_err(|_| {
        IgniteError::Serialization("decimal magnitude exceeds supported precision".to_string())
    })?;
    if negative {
        mantissa = -mantissa;
    }

    let (mantissa, scale) = if scale < 0 {
        let factor = 10i128
            .checked_pow(scale.unsigned_abs())
            .and_then(|f| mantissa.checked_mul(f))
            .ok_or_else(|| {
                IgniteError::Serialization(format!("decimal with scale {} overflows", scale))
            })?;
        (factor, 0u32)
    } else {
        (mantissa, scale as u32)
    };

    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map_err(|e| IgniteError::Serialization(format!("unsupported decimal value: {}", e)))
}

/// Java `BigDecimal.hashCode`: `31 * unscaled.hashCode() + scale`.
pub fn decimal_hash(value: &Decimal) -> i32 {
    let mantissa = value.mantissa();
    let magnitude = mantissa.unsigned_abs();
    let mut hash: i32 = 0;
    let mut started = false;
    for shift in [96u32, 64, 32, 0] {
        let word = (magnitude >> shift) as u32;
        if word == 0 && !started {
            continue;
        }
        started = true;
        hash = hash.wrapping_mul(31).wrapping_add(word as i32);
    }
    let signum = mantissa.signum() as i32;
    hash.wrapping_mul(signum)
        .wrapping_mul(31)
        .wrapping_add(value.scale() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn encode(value: &Decimal) -> Vec<u8> {
        let mut out = ObjectDataOutput::new();
        write_decimal(&mut out, value).unwrap();
        out.into_bytes()
    }

    #[test]
    fn test_positive_encoding() {
        let bytes = encode(&Decimal::from_str("1.5").unwrap());
        assert_eq!(bytes, vec![1, 0, 0, 0, 1, 0, 0, 0, 15]);
    }

    #[test]
    fn test_negative_encoding_sets_sign_bit() {
        let bytes = encode(&Decimal::from_str("-1.5").unwrap());
        assert_eq!(bytes, vec![1, 0, 0, 0, 1, 0, 0, 0, 0x8F]);
    }

    #[test]
    fn test_high_bit_magnitude_gets_padding_byte() {
        let bytes = encode(&Decimal::from(200));
        assert_eq!(bytes, vec![0, 0, 0, 0, 2, 0, 0, 0, 0, 200]);
        let neg = encode(&Decimal::from(-200));
        assert_eq!(neg, vec![0, 0, 0, 0, 2, 0, 0, 0, 0x80, 200]);
    }

    #[test]
    fn test_zero_encoding() {
        assert_eq!(encode(&Decimal::ZERO), vec![0, 0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_round_trip_preserves_scale() {
        for text in ["0", "1.50", "-123456789.000001", "79228162514264337593543950335"] {
            let value = Decimal::from_str(text).unwrap();
            let bytes = encode(&value);
            let decoded = read_decimal(&mut ObjectDataInput::new(&bytes)).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(decoded.scale(), value.scale());
        }
    }

    #[test]
    fn test_negative_scale_is_expanded() {
        // 12E+3
        let bytes = [0xFD, 0xFF, 0xFF, 0xFF, 1, 0, 0, 0, 12];
        let decoded = read_decimal(&mut ObjectDataInput::new(&bytes)).unwrap();
        assert_eq!(decoded, Decimal::from(12_000));
    }

    #[test]
    fn test_oversized_magnitude_rejected() {
        let mut bytes = vec![0, 0, 0, 0, 20, 0, 0, 0];
        bytes.extend(std::iter::repeat(0x7F).take(20));
        assert!(read_decimal(&mut ObjectDataInput::new(&bytes)).is_err());
    }

    #[test]
    fn test_java_hash_codes() {
        assert_eq!(decimal_hash(&Decimal::from_str("1.5").unwrap()), 466);
        assert_eq!(decimal_hash(&Decimal::from_str("-1.5").unwrap()), -464);
        assert_eq!(decimal_hash(&Decimal::ZERO), 0);
        // BigInteger(2^32) has magnitude words [1, 0]
        assert_eq!(decimal_hash(&Decimal::from(4_294_967_296i64)), 31 * 31);
    }
}

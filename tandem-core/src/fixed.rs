//! Fixed-precision encoding of real numbers.
//!
//! The homomorphic layer operates on integers, so reals are scaled by
//! `10^precision` and rounded before encryption. Adding two encoded values
//! keeps the scale; multiplying two encoded values doubles it, which is why
//! the decrypted gradient and cost pieces are decoded at `2 * precision`.

use num::{
    bigint::BigInt,
    rational::Ratio,
    traits::{pow::Pow, ToPrimitive},
};

/// The scale factor `10^precision`.
pub fn scale(precision: u32) -> BigInt {
    BigInt::from(10_u8).pow(precision)
}

/// Encodes a real as `round(value * 10^precision)`.
///
/// Returns `None` for non-finite values.
pub fn encode(value: f64, precision: u32) -> Option<BigInt> {
    let ratio = Ratio::from_float(value)?;
    Some((ratio * Ratio::from_integer(scale(precision))).round().to_integer())
}

/// Decodes an integer produced by [`encode`], or by sums and products of
/// encoded values at the matching scale.
pub fn decode(value: &BigInt, precision: u32) -> f64 {
    // approximate by construction, like any conversion back to f64
    Ratio::new(value.clone(), scale(precision))
        .to_f64()
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        for value in [0.0, 1.0, -1.0, 0.123456, -98.765432, 1e6] {
            let encoded = encode(value, 6).unwrap();
            assert!((decode(&encoded, 6) - value).abs() < 5e-7);
        }
    }

    #[test]
    fn test_encode_rounds_to_nearest() {
        assert_eq!(encode(0.1234567, 6).unwrap(), BigInt::from(123_457));
        assert_eq!(encode(-0.1234567, 6).unwrap(), BigInt::from(-123_457));
    }

    #[test]
    fn test_product_of_encodings_decodes_at_double_precision() {
        let a = encode(1.5, 6).unwrap();
        let b = encode(-2.25, 6).unwrap();
        assert!((decode(&(a * b), 12) - (-3.375)).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        assert!(encode(f64::NAN, 6).is_none());
        assert!(encode(f64::INFINITY, 6).is_none());
    }
}

//! IEEE-754 binary16 conversion.
//!
//! Bricks stored as `f16` carry one binary16 bit pattern per voxel. Widening
//! to binary32 is exact for every pattern, so the decoder reproduces the
//! producer's values bit for bit.

/// Exponent bias difference between binary32 (127) and binary16 (15).
const REBIAS: u32 = 127 - 15;

/// Convert a binary16 bit pattern to `f32`.
///
/// - Zero keeps its sign.
/// - Subnormal halves are renormalized: the mantissa is shifted left until the
///   implicit bit appears, decrementing the exponent once per shift.
/// - Exponent 31 maps to infinity or NaN, keeping the sign and the NaN payload.
#[must_use]
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exponent = u32::from((bits >> 10) & 0x1F);
    let mut mantissa = u32::from(bits & 0x03FF);

    let out = match exponent {
        0 if mantissa == 0 => sign,
        0 => {
            let mut rebiased = REBIAS + 1;
            while mantissa & 0x0400 == 0 {
                mantissa <<= 1;
                rebiased -= 1;
            }
            mantissa &= 0x03FF;
            sign | (rebiased << 23) | (mantissa << 13)
        }
        0x1F => sign | 0x7F80_0000 | (mantissa << 13),
        _ => sign | ((exponent + REBIAS) << 23) | (mantissa << 13),
    };

    f32::from_bits(out)
}

/// Convert an `f32` to the nearest binary16 bit pattern.
///
/// Rounds to nearest, ties to even. Values beyond the binary16 range become
/// infinity and values below half the smallest subnormal become signed zero.
/// NaN stays NaN.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = (bits >> 23) & 0xFF;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        let mut payload = (mantissa >> 13) as u16;
        if mantissa != 0 && payload == 0 {
            payload = 0x0200;
        }
        return sign | 0x7C00 | payload;
    }

    // Unbiased exponent above 15 overflows.
    if exponent > REBIAS + 30 {
        return sign | 0x7C00;
    }

    // Normal range. A rounding carry may ripple into the exponent, which
    // correctly produces the next binade or infinity.
    if exponent > REBIAS {
        let mut half = ((exponent - REBIAS) << 10) | (mantissa >> 13);
        let rest = mantissa & 0x1FFF;
        if rest > 0x1000 || (rest == 0x1000 && half & 1 == 1) {
            half += 1;
        }
        return sign | half as u16;
    }

    // Below 2^-25 nothing survives rounding.
    if exponent < REBIAS - 10 {
        return sign;
    }

    // Subnormal range: units of 2^-24.
    let significand = mantissa | 0x0080_0000;
    let shift = 126 - exponent;
    let mut half = significand >> shift;
    let rest = significand & ((1 << shift) - 1);
    let halfway = 1 << (shift - 1);
    if rest > halfway || (rest == halfway && half & 1 == 1) {
        half += 1;
    }
    sign | half as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Exact value of a finite binary16 pattern, computed independently.
    fn reference(bits: u16) -> f64 {
        let sign = if bits & 0x8000 == 0 { 1.0 } else { -1.0 };
        let exponent = i32::from((bits >> 10) & 0x1F);
        let mantissa = f64::from(bits & 0x03FF);
        if exponent == 0 {
            sign * mantissa * 2f64.powi(-24)
        } else {
            sign * (1024.0 + mantissa) * 2f64.powi(exponent - 25)
        }
    }

    fn is_nan_pattern(bits: u16) -> bool {
        bits & 0x7C00 == 0x7C00 && bits & 0x03FF != 0
    }

    #[test]
    fn test_f16_known_values() {
        assert_eq!(f16_bits_to_f32(0x0000).to_bits(), 0.0f32.to_bits());
        assert_eq!(f16_bits_to_f32(0x8000).to_bits(), (-0.0f32).to_bits());
        assert_eq!(f16_bits_to_f32(0x3C00), 1.0);
        assert_eq!(f16_bits_to_f32(0xC000), -2.0);
        assert_eq!(f16_bits_to_f32(0x3555), 0.333_251_95);
        assert_eq!(f16_bits_to_f32(0x7BFF), 65504.0);
        // Smallest subnormal and largest subnormal.
        assert_eq!(f16_bits_to_f32(0x0001), 2f32.powi(-24));
        assert_eq!(f16_bits_to_f32(0x03FF), 1023.0 * 2f32.powi(-24));
        // Smallest normal.
        assert_eq!(f16_bits_to_f32(0x0400), 2f32.powi(-14));
    }

    #[test]
    fn test_f16_infinity_and_nan() {
        assert_eq!(f16_bits_to_f32(0x7C00), f32::INFINITY);
        assert_eq!(f16_bits_to_f32(0xFC00), f32::NEG_INFINITY);

        let nan = f16_bits_to_f32(0x7E01);
        assert!(nan.is_nan());
        // Payload lands in the top of the binary32 mantissa.
        assert_eq!(nan.to_bits() & 0x007F_FFFF, 0x0201 << 13);

        let negative_nan = f16_bits_to_f32(0xFC01);
        assert!(negative_nan.is_nan());
        assert!(negative_nan.is_sign_negative());
    }

    #[test]
    fn test_f16_exhaustive_against_reference() {
        for bits in 0..=u16::MAX {
            if bits & 0x7C00 == 0x7C00 {
                continue;
            }
            let value = f16_bits_to_f32(bits);
            assert_eq!(f64::from(value), reference(bits), "bits {bits:#06x}");
            assert_eq!(value.is_sign_negative(), bits & 0x8000 != 0, "bits {bits:#06x}");
        }
    }

    #[test]
    fn test_f16_round_trip_every_pattern() {
        for bits in 0..=u16::MAX {
            let widened = f16_bits_to_f32(bits);
            assert_eq!(f32_to_f16_bits(widened), bits, "bits {bits:#06x}");
        }
    }

    #[test]
    fn test_f32_to_f16_rounding() {
        // Halfway between 1.0 and the next half: ties to even (down).
        assert_eq!(f32_to_f16_bits(1.0 + 2f32.powi(-11)), 0x3C00);
        // Halfway between an odd and an even mantissa: ties to even (up).
        assert_eq!(f32_to_f16_bits(1.0 + 3.0 * 2f32.powi(-11)), 0x3C02);
        // Overflow.
        assert_eq!(f32_to_f16_bits(65520.0), 0x7C00);
        assert_eq!(f32_to_f16_bits(-1.0e9), 0xFC00);
        // Underflow.
        assert_eq!(f32_to_f16_bits(2f32.powi(-25)), 0x0000);
        assert_eq!(f32_to_f16_bits(1.5 * 2f32.powi(-25)), 0x0001);
        assert_eq!(f32_to_f16_bits(-1.0e-12), 0x8000);
        assert!(f16_bits_to_f32(f32_to_f16_bits(f32::NAN)).is_nan());
    }

    #[test]
    fn test_powers_of_two_round_trip_exactly() {
        for exponent in -24..=15 {
            let value = 2f32.powi(exponent);
            assert_eq!(f16_bits_to_f32(f32_to_f16_bits(value)), value);
            assert_eq!(f16_bits_to_f32(f32_to_f16_bits(-value)), -value);
        }
    }

    proptest! {
        #[test]
        fn prop_negation_flips_only_the_sign(bits in any::<u16>()) {
            prop_assume!(!is_nan_pattern(bits));
            let value = f16_bits_to_f32(bits);
            let negated = f16_bits_to_f32(bits ^ 0x8000);
            prop_assert_eq!(value.to_bits() ^ 0x8000_0000, negated.to_bits());
        }

        #[test]
        fn prop_positive_patterns_are_monotonic(a in 0u16..0x7C00, b in 0u16..0x7C00) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(f16_bits_to_f32(lo) <= f16_bits_to_f32(hi));
        }

        #[test]
        fn prop_narrowing_stays_within_half_an_ulp(value in -60000.0f32..60000.0) {
            let narrowed = f16_bits_to_f32(f32_to_f16_bits(value));
            let magnitude = value.abs().max(2f32.powi(-14));
            // One binary16 ulp is 2^-10 of the binade.
            let ulp = 2f32.powi(magnitude.log2().floor() as i32 - 10);
            prop_assert!((narrowed - value).abs() <= ulp / 2.0);
        }
    }
}

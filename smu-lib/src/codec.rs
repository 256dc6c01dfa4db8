//! Conversions between host-side integers and the hexadecimal wire fields.
//!
//! Every field on the wire is an uppercase hexadecimal number with no fixed
//! width. Signed values are carried by two's-complement wraparound at the
//! width of the register they land in, 32-bit values travel as two 16-bit
//! words (low word first) and the DAC16 differential outputs use a
//! positive/negative pair centered on mid-scale.

use crate::error::{Result, SmuError};

/// Mid-scale of a 16-bit DAC, the common mode of a differential pair.
const DIFF_MID_SCALE: i64 = 65536;

/// Full-scale code the ADC16 readings are normalised to.
pub const ADC16_FULL_SCALE: i64 = 32767;

/// Format an already-encoded register value as a wire field.
pub fn hex(value: u32) -> String {
    format!("{value:X}")
}

fn check_width(width_bits: u32) {
    assert!(
        (1..=32).contains(&width_bits),
        "field width must be between 1 and 32 bits, got {width_bits}"
    );
}

fn check_range(value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(SmuError::Range { value, min, max });
    }
    Ok(())
}

pub fn encode_unsigned(value: i64, width_bits: u32) -> Result<String> {
    check_width(width_bits);
    check_range(value, 0, (1i64 << width_bits) - 1)?;
    Ok(hex(value as u32))
}

/// Encode a signed value by adding `2^width` to negative inputs.
///
/// Inputs already in the unsigned half of the register are passed through,
/// so the accepted range is `[-2^(width-1), 2^width - 1]`.
pub fn encode_signed_wrap(value: i64, width_bits: u32) -> Result<String> {
    check_width(width_bits);
    let modulus = 1i64 << width_bits;
    check_range(value, -(modulus >> 1), modulus - 1)?;
    let wrapped = if value < 0 { value + modulus } else { value };
    Ok(hex(wrapped as u32))
}

/// Interpret the low `width_bits` of `raw` as a two's-complement number.
pub fn decode_signed(raw: u32, width_bits: u32) -> i64 {
    check_width(width_bits);
    let modulus = 1i64 << width_bits;
    let raw = i64::from(raw) & (modulus - 1);
    if raw >= modulus >> 1 { raw - modulus } else { raw }
}

/// Split a 32-bit value into `(low, high)` 16-bit wire fields.
pub fn encode_split32(value: i64) -> Result<(String, String)> {
    check_range(value, i64::from(i32::MIN), i64::from(u32::MAX))?;
    let raw = value.rem_euclid(1i64 << 32) as u32;
    Ok((hex(raw & 0xFFFF), hex(raw >> 16)))
}

/// Reassemble a signed 32-bit value from its low and high 16-bit words.
pub fn decode_split32(low: u32, high: u32) -> i64 {
    let raw = ((high & 0xFFFF) << 16) | (low & 0xFFFF);
    i64::from(raw as i32)
}

/// Encode a DAC16 differential output as `(pos, neg)` fields.
///
/// `pos = (65536 + v) >> 1` and `neg = (65536 - v) >> 1`. For odd `v` both
/// shifts drop half a step, so the difference is still `v` but the common
/// mode sits one code below mid-scale.
pub fn encode_diff_pair(value: i64) -> Result<(String, String)> {
    check_range(value, -65535, 65535)?;
    let pos = (DIFF_MID_SCALE + value) >> 1;
    let neg = (DIFF_MID_SCALE - value) >> 1;
    Ok((hex(pos as u32), hex(neg as u32)))
}

pub fn decode_diff_pair(pos: u32, neg: u32) -> i64 {
    i64::from(pos) - i64::from(neg)
}

/// Normalise a signed ADC16 reading against the calibrated maximum.
///
/// Floor division, matching the firmware's host tooling, so negative
/// readings round toward negative infinity.
pub fn scale_adc16(raw_signed: i64, maxval: u32) -> Result<i64> {
    if maxval == 0 {
        return Err(SmuError::Protocol(
            "ADC16 calibration maximum is zero".to_string(),
        ));
    }
    Ok((ADC16_FULL_SCALE * raw_signed).div_euclid(i64::from(maxval)))
}

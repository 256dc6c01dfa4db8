use crate::codec;
use crate::error::{Result, SmuError};

/// Numeric base of the fields in a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Base {
    #[default]
    Hex,
    /// Single boolean-style replies (`0`/`1`) to LED, switch and bit queries.
    Decimal,
}

impl Base {
    fn radix(self) -> u32 {
        match self {
            Base::Hex => 16,
            Base::Decimal => 10,
        }
    }
}

/// Number of comma-separated fields a reply must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    /// Variable-length replies such as `FLASH:READ`.
    Any,
}

/// Split `line` on commas and parse every field in `base`.
///
/// Returns raw unsigned values; width and sign interpretation is left to
/// the caller.
pub fn parse(line: &str, arity: Arity, base: Base) -> Result<Vec<u32>> {
    let line = line.trim();
    let fields: Vec<&str> = line.split(',').collect();

    if let Arity::Exactly(expected) = arity {
        if fields.len() != expected {
            return Err(SmuError::ArityMismatch {
                expected,
                actual: fields.len(),
                line: line.to_string(),
            });
        }
    }

    fields
        .into_iter()
        .map(|field| {
            let field = field.trim();
            u32::from_str_radix(field, base.radix()).map_err(|e| {
                SmuError::Protocol(format!("invalid {base:?} field {field:?} in {line:?}: {e}"))
            })
        })
        .collect()
}

/// Parse a reply carrying exactly one field.
pub fn parse_single(line: &str, base: Base) -> Result<u32> {
    Ok(parse(line, Arity::Exactly(1), base)?[0])
}

/// Parse a `low,high` reply into a signed 32-bit value.
pub fn parse_split32(line: &str) -> Result<i64> {
    let fields = parse(line, Arity::Exactly(2), Base::Hex)?;
    Ok(codec::decode_split32(fields[0], fields[1]))
}

/// Parse the four-field `ADC24:BOTH?` reply into `[ch1, ch2]`.
pub fn parse_split32_pair(line: &str) -> Result<[i64; 2]> {
    let f = parse(line, Arity::Exactly(4), Base::Hex)?;
    Ok([
        codec::decode_split32(f[0], f[1]),
        codec::decode_split32(f[2], f[3]),
    ])
}

/// Parse a `pos,neg` differential reply.
pub fn parse_diff_pair(line: &str) -> Result<i64> {
    let fields = parse(line, Arity::Exactly(2), Base::Hex)?;
    Ok(codec::decode_diff_pair(fields[0], fields[1]))
}

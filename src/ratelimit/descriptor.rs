//! Limits descriptor parsing.
//!
//! The remote service describes a set of quotas as a comma separated list of
//! `limit:duration` pairs, e.g. `20:1,100:120`. The same shape is used for
//! usage counters (`count:duration`), so the pair parser is shared.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One quota tier: at most `limit` requests in any window of `duration` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitTier {
    /// Maximum requests allowed in the window
    pub limit: u64,
    /// Window length in seconds
    pub duration: u64,
}

impl LimitTier {
    /// Create a new tier.
    pub fn new(limit: u64, duration: u64) -> Self {
        Self { limit, duration }
    }
}

impl fmt::Display for LimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.limit, self.duration)
    }
}

/// Why a descriptor was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorErrorKind {
    /// The whole descriptor is empty
    Empty,
    /// A tier between two commas is empty
    EmptyTier,
    /// A tier has no `:` separator
    MissingColon,
    /// A tier has more than one `:` separator
    ExtraColon,
    /// One side of a `:` is empty
    MissingNumber,
    /// A character other than an ASCII digit was found
    InvalidDigit,
    /// The number does not fit in 64 bits
    Overflow,
}

impl fmt::Display for DescriptorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DescriptorErrorKind::Empty => "descriptor is empty",
            DescriptorErrorKind::EmptyTier => "empty tier",
            DescriptorErrorKind::MissingColon => "tier is missing ':'",
            DescriptorErrorKind::ExtraColon => "tier has more than one ':'",
            DescriptorErrorKind::MissingNumber => "missing number",
            DescriptorErrorKind::InvalidDigit => "invalid digit",
            DescriptorErrorKind::Overflow => "number too large",
        };
        f.write_str(reason)
    }
}

/// A limits descriptor that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid limits descriptor {input:?} at byte {position}: {kind}")]
pub struct DescriptorError {
    /// The rejected input
    pub input: String,
    /// Byte offset where the problem was found
    pub position: usize,
    /// What went wrong
    pub kind: DescriptorErrorKind,
}

impl DescriptorError {
    fn new(input: &str, position: usize, kind: DescriptorErrorKind) -> Self {
        Self {
            input: input.to_string(),
            position,
            kind,
        }
    }
}

/// Parse a limits descriptor into tiers, preserving left-to-right order.
pub fn parse_descriptor(input: &str) -> Result<Vec<LimitTier>, DescriptorError> {
    Ok(parse_pairs(input)?
        .into_iter()
        .map(|(limit, duration)| LimitTier { limit, duration })
        .collect())
}

/// Parse `a:b,c:d,...` into integer pairs.
pub(crate) fn parse_pairs(input: &str) -> Result<Vec<(u64, u64)>, DescriptorError> {
    if input.is_empty() {
        return Err(DescriptorError::new(input, 0, DescriptorErrorKind::Empty));
    }

    let mut pairs = Vec::new();
    let mut offset = 0;
    for tier in input.split(',') {
        if tier.is_empty() {
            return Err(DescriptorError::new(input, offset, DescriptorErrorKind::EmptyTier));
        }

        let (left, right) = tier.split_once(':').ok_or_else(|| {
            DescriptorError::new(input, offset + tier.len(), DescriptorErrorKind::MissingColon)
        })?;
        if let Some(extra) = right.find(':') {
            return Err(DescriptorError::new(
                input,
                offset + left.len() + 1 + extra,
                DescriptorErrorKind::ExtraColon,
            ));
        }

        let first = parse_number(input, left, offset)?;
        let second = parse_number(input, right, offset + left.len() + 1)?;
        pairs.push((first, second));

        offset += tier.len() + 1;
    }

    Ok(pairs)
}

fn parse_number(input: &str, digits: &str, offset: usize) -> Result<u64, DescriptorError> {
    if digits.is_empty() {
        return Err(DescriptorError::new(input, offset, DescriptorErrorKind::MissingNumber));
    }

    // `u64::from_str` accepts a leading '+', the wire format does not.
    let mut value: u64 = 0;
    for (i, byte) in digits.bytes().enumerate() {
        if !byte.is_ascii_digit() {
            return Err(DescriptorError::new(input, offset + i, DescriptorErrorKind::InvalidDigit));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or_else(|| DescriptorError::new(input, offset, DescriptorErrorKind::Overflow))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_tiers_in_order() {
        let tiers = parse_descriptor("5:1,100:120").unwrap();
        assert_eq!(tiers, vec![LimitTier::new(5, 1), LimitTier::new(100, 120)]);
    }

    #[test]
    fn test_parse_single_tier() {
        let tiers = parse_descriptor("2000:10").unwrap();
        assert_eq!(tiers, vec![LimitTier::new(2000, 10)]);
    }

    #[test]
    fn test_parse_zero_values() {
        let tiers = parse_descriptor("0:0").unwrap();
        assert_eq!(tiers, vec![LimitTier::new(0, 0)]);
    }

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(LimitTier::new(20, 1).to_string(), "20:1");
    }

    #[test]
    fn test_reject_empty() {
        let err = parse_descriptor("").unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::Empty);
    }

    #[test]
    fn test_reject_trailing_comma() {
        let err = parse_descriptor("20:1,").unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::EmptyTier);
        assert_eq!(err.position, 5);
    }

    #[test]
    fn test_reject_missing_colon() {
        let err = parse_descriptor("20:1,100").unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::MissingColon);
    }

    #[test]
    fn test_reject_extra_colon() {
        let err = parse_descriptor("20:1:5").unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::ExtraColon);
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_reject_missing_number() {
        assert_eq!(parse_descriptor(":1").unwrap_err().kind, DescriptorErrorKind::MissingNumber);
        assert_eq!(parse_descriptor("1:").unwrap_err().kind, DescriptorErrorKind::MissingNumber);
    }

    #[test]
    fn test_reject_non_digits() {
        let err = parse_descriptor("20:1,1x0:120").unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::InvalidDigit);
        assert_eq!(err.position, 6);

        assert_eq!(parse_descriptor("+5:1").unwrap_err().kind, DescriptorErrorKind::InvalidDigit);
        assert_eq!(parse_descriptor(" 5:1").unwrap_err().kind, DescriptorErrorKind::InvalidDigit);
        assert_eq!(parse_descriptor("-5:1").unwrap_err().kind, DescriptorErrorKind::InvalidDigit);
    }

    #[test]
    fn test_reject_overflow() {
        let err = parse_descriptor("99999999999999999999:1").unwrap_err();
        assert_eq!(err.kind, DescriptorErrorKind::Overflow);
    }

    #[test]
    fn test_error_message_names_input() {
        let err = parse_descriptor("abc").unwrap_err();
        assert!(err.to_string().contains("\"abc\""));
    }
}

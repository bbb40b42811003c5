//! Exact conversions between raw on-chain integer amounts and human-readable
//! decimal strings. Nothing on this path touches floating point.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::types::{QuoterError, Result};

/// Parse a raw integer amount (smallest token unit) such as `"1250000"`.
pub fn parse_raw_amount(raw: &str) -> Result<BigUint> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QuoterError::Amount(format!("'{}' is not a raw integer amount", raw)));
    }
    BigUint::parse_bytes(raw.as_bytes(), 10)
        .ok_or_else(|| QuoterError::Amount(format!("'{}' is not a raw integer amount", raw)))
}

/// Convert a decimal string (`"1.5"`) into the token's smallest unit.
///
/// Fractional digits beyond `decimals` are truncated, never rounded up, so
/// the result never exceeds what the user typed.
pub fn human_to_raw(amount: &str, decimals: u32) -> Result<BigUint> {
    let amount = amount.trim();
    let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(QuoterError::Amount(format!("'{}' is not a decimal amount", amount)));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QuoterError::Amount(format!("'{}' is not a decimal amount", amount)));
    }

    let width = decimals as usize;
    let frac = &frac[..frac.len().min(width)];
    let digits = format!("{}{:0<width$}", whole, frac, width = width);
    if digits.is_empty() {
        return Ok(BigUint::zero());
    }
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| QuoterError::Amount(format!("'{}' is not a decimal amount", amount)))
}

/// String form of [`human_to_raw`].
pub fn human_readable_to_raw_amount(amount: &str, decimals: u32) -> Result<String> {
    Ok(human_to_raw(amount, decimals)?.to_str_radix(10))
}

/// Format a raw amount with `decimals` fractional digits.
///
/// Trailing fractional zeros are trimmed but one fractional digit is always
/// kept when `decimals > 0`, so `2_000_000` at 6 decimals renders as `"2.0"`.
pub fn format_raw(value: &BigUint, decimals: u32) -> String {
    let digits = value.to_str_radix(10);
    if decimals == 0 {
        return digits;
    }
    let width = decimals as usize;
    let padded = format!("{:0>width$}", digits, width = width + 1);
    let (whole, frac) = padded.split_at(padded.len() - width);
    let frac = frac.trim_end_matches('0');
    format!("{}.{}", whole, if frac.is_empty() { "0" } else { frac })
}

/// String form of [`format_raw`].
pub fn raw_amount_to_human_readable(raw: &str, decimals: u32) -> Result<String> {
    Ok(format_raw(&parse_raw_amount(raw)?, decimals))
}

/// Approximate value of a raw amount, for USD valuation and display only.
pub fn raw_amount_to_f64(raw: &str, decimals: u32) -> Option<f64> {
    raw_amount_to_human_readable(raw, decimals).ok()?.parse().ok()
}

/// True when `amount` parses and is strictly greater than zero at `decimals`.
pub fn is_positive_amount(amount: &str, decimals: u32) -> bool {
    human_to_raw(amount, decimals).map(|v| !v.is_zero()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_excess_fraction() {
        assert_eq!(human_readable_to_raw_amount("1.23456789", 6).unwrap(), "1234567");
        assert_eq!(human_readable_to_raw_amount(".5", 2).unwrap(), "50");
        assert_eq!(human_readable_to_raw_amount("7.", 3).unwrap(), "7000");
        assert_eq!(human_readable_to_raw_amount("0.9", 0).unwrap(), "0");
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", ".", "-1", "1e5", "1.2.3", "abc", "1,5"] {
            assert!(human_readable_to_raw_amount(bad, 6).is_err(), "{bad}");
        }
        assert!(parse_raw_amount("12a").is_err());
        assert!(parse_raw_amount("").is_err());
    }

    #[test]
    fn test_format_keeps_one_fraction_digit() {
        assert_eq!(raw_amount_to_human_readable("2000000", 6).unwrap(), "2.0");
        assert_eq!(raw_amount_to_human_readable("5", 6).unwrap(), "0.000005");
        assert_eq!(raw_amount_to_human_readable("0", 6).unwrap(), "0.0");
        assert_eq!(raw_amount_to_human_readable("42", 0).unwrap(), "42");
    }
}

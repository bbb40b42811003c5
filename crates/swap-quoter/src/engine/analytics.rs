//! Derived swap quantities: price impact, worst-case bounds and
//! balance-aware amount presets.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::data_management::token::{NEAR_DECIMALS, NEAR_TOKEN_ID};
use crate::types::{Result, SwapDirection};
use crate::utils::amount::{format_raw, human_to_raw, parse_raw_amount};

pub const PRICE_IMPACT_WARNING_PERCENT: f64 = 2.5;
pub const PRICE_IMPACT_SEVERE_PERCENT: f64 = 5.0;
/// Native balance kept back for gas when computing the spendable maximum.
pub const NEAR_GAS_RESERVE: &str = "0.03";

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactLevel {
    Normal,
    Warning,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceImpact {
    pub percent: f64,
    pub level: ImpactLevel,
}

/// `(in_usd - out_usd) / in_usd * 100`, or `None` unless both values are
/// positive and finite.
pub fn price_impact(in_usd: f64, out_usd: f64) -> Option<PriceImpact> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !valid(in_usd) || !valid(out_usd) {
        return None;
    }
    let percent = (in_usd - out_usd) / in_usd * 100.0;
    let level = if percent >= PRICE_IMPACT_SEVERE_PERCENT {
        ImpactLevel::Severe
    } else if percent >= PRICE_IMPACT_WARNING_PERCENT {
        ImpactLevel::Warning
    } else {
        ImpactLevel::Normal
    };
    Some(PriceImpact { percent, level })
}

/// USD value of a human-readable amount at `price`.
pub fn usd_value(amount: &str, price: f64) -> Option<f64> {
    let amount: f64 = amount.trim().parse().ok()?;
    let value = amount * price;
    value.is_finite().then_some(value)
}

/// Balance the user can actually spend. Native NEAR keeps a gas reserve,
/// saturating at zero.
pub fn max_spendable(token_id: &str, balance_raw: &str) -> Result<BigUint> {
    let balance = parse_raw_amount(balance_raw)?;
    if token_id != NEAR_TOKEN_ID {
        return Ok(balance);
    }
    let reserve = human_to_raw(NEAR_GAS_RESERVE, NEAR_DECIMALS)?;
    Ok(if balance > reserve { balance - reserve } else { BigUint::zero() })
}

/// Exact percentage presets of the spendable balance, formatted for display.
/// A 100 preset is the full spendable amount.
pub fn amount_presets(token_id: &str, balance_raw: &str, decimals: u32, percents: &[u32]) -> Result<Vec<String>> {
    let spendable = max_spendable(token_id, balance_raw)?;
    Ok(percents
        .iter()
        .map(|p| format_raw(&(&spendable * *p / 100u32), decimals))
        .collect())
}

/// Minimum received (exact-in) or maximum paid (exact-out) for an estimate
/// under `slippage_bps`. Exact-out rounds up so the bound is never too tight.
pub fn worst_case_bound(estimate_raw: &str, slippage_bps: u32, direction: SwapDirection) -> Result<BigUint> {
    let estimate = parse_raw_amount(estimate_raw)?;
    let bps = slippage_bps.min(BPS_DENOMINATOR);
    Ok(match direction {
        SwapDirection::ExactIn => estimate * (BPS_DENOMINATOR - bps) / BPS_DENOMINATOR,
        SwapDirection::ExactOut => {
            let scaled = estimate * (BPS_DENOMINATOR + bps);
            (scaled + (BPS_DENOMINATOR - 1)) / BPS_DENOMINATOR
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_impact_levels() {
        assert_eq!(price_impact(100.0, 99.0).unwrap().level, ImpactLevel::Normal);
        assert_eq!(price_impact(100.0, 97.5).unwrap().level, ImpactLevel::Warning);
        assert_eq!(price_impact(100.0, 90.0).unwrap().level, ImpactLevel::Severe);
        assert!((price_impact(200.0, 190.0).unwrap().percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_impact_needs_positive_finite_inputs() {
        assert!(price_impact(0.0, 1.0).is_none());
        assert!(price_impact(1.0, 0.0).is_none());
        assert!(price_impact(f64::INFINITY, 1.0).is_none());
        assert!(price_impact(1.0, f64::NAN).is_none());
    }

    #[test]
    fn test_max_spendable_keeps_gas_reserve() {
        // 1 NEAR
        let one = "1000000000000000000000000";
        assert_eq!(max_spendable("near", one).unwrap().to_string(), "970000000000000000000000");
        assert_eq!(max_spendable("near", "1000").unwrap(), BigUint::zero());
        assert_eq!(max_spendable("usdt.near", "1000").unwrap().to_string(), "1000");
    }

    #[test]
    fn test_amount_presets() {
        let presets = amount_presets("usdt.near", "10000000", 6, &[25, 50, 100]).unwrap();
        assert_eq!(presets, vec!["2.5", "5.0", "10.0"]);
    }

    #[test]
    fn test_worst_case_bound() {
        assert_eq!(worst_case_bound("1000000", 50, SwapDirection::ExactIn).unwrap().to_string(), "995000");
        assert_eq!(worst_case_bound("1000001", 50, SwapDirection::ExactOut).unwrap().to_string(), "1005002");
    }
}

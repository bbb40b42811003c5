//! Raw/decimal amount conversions at chain scale.

use num_bigint::BigUint;
use swap_quoter::utils::amount::{
    format_raw, human_readable_to_raw_amount, human_to_raw, is_positive_amount, raw_amount_to_human_readable,
};

#[test]
fn test_tenth_survives_round_trip_at_24_decimals() {
    let raw = human_readable_to_raw_amount("0.1", 24).unwrap();
    assert_eq!(raw, "100000000000000000000000");
    assert_eq!(raw_amount_to_human_readable(&raw, 24).unwrap(), "0.1");
}

#[test]
fn test_large_values_round_trip_exactly() {
    let raw = "1234567890123456789012345678901234";
    for decimals in [0u32, 6, 18, 24] {
        let human = raw_amount_to_human_readable(raw, decimals).unwrap();
        assert_eq!(human_readable_to_raw_amount(&human, decimals).unwrap(), raw, "decimals {}", decimals);
    }
}

#[test]
fn test_display_forms() {
    assert_eq!(format_raw(&BigUint::from(2_000_000u32), 6), "2.0");
    assert_eq!(format_raw(&BigUint::from(1u32), 6), "0.000001");
    assert_eq!(format_raw(&BigUint::from(10u32).pow(30), 24), "1000000.0");
}

#[test]
fn test_input_beyond_precision_is_truncated() {
    assert_eq!(human_to_raw("1.239", 2).unwrap(), BigUint::from(123u32));
    assert_eq!(human_to_raw("0.0000001", 6).unwrap(), BigUint::from(0u32));
}

#[test]
fn test_positive_amount_check() {
    assert!(is_positive_amount("0.000001", 6));
    assert!(!is_positive_amount("0.0000001", 6));
    assert!(!is_positive_amount("0", 6));
    assert!(!is_positive_amount("abc", 6));
}

//! Display precision and quantity bucket tables
//!
//! Order-book aggregation, tape prints and the market maker all round to
//! these tables so that dust-level price differences collapse into a single
//! displayed level. Kept in one place so the engine snapshot, the DB-backed
//! virtual book and the frontend formatting stay in lockstep.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Price display precision (decimal places) by price magnitude.
pub fn price_precision(price: Decimal) -> u32 {
    let p = price.to_f64().unwrap_or(0.0);
    if p >= 1000.0 {
        2
    } else if p >= 100.0 {
        2
    } else if p >= 1.0 {
        3
    } else if p >= 0.01 {
        4
    } else if p >= 0.0001 {
        6
    } else {
        8
    }
}

/// Round a price to its own display precision.
pub fn round_price(price: Decimal) -> Decimal {
    price.round_dp(price_precision(price))
}

/// Quantity display precision (decimal places) by price magnitude.
pub fn qty_precision(price: Decimal) -> u32 {
    let p = price.to_f64().unwrap_or(0.0);
    if p >= 1000.0 {
        4
    } else if p >= 100.0 {
        3
    } else if p >= 10.0 {
        2
    } else if p >= 1.0 {
        2
    } else {
        0
    }
}

/// Round a quantity to the display precision implied by the price it trades
/// at.
pub fn round_qty(qty: Decimal, price: Decimal) -> Decimal {
    qty.round_dp(qty_precision(price))
}

/// Base quantity range for simulated orders and tape prints, by price
/// bucket. Higher-priced assets quote smaller sizes.
pub fn qty_range_for_price(price: Decimal) -> (Decimal, Decimal) {
    let p = price.to_f64().unwrap_or(0.0);
    if p > 10_000.0 {
        (dec!(0.01), dec!(0.06))
    } else if p > 1_000.0 {
        (dec!(0.1), dec!(0.6))
    } else if p > 100.0 {
        (dec!(1), dec!(11))
    } else if p > 10.0 {
        (dec!(10), dec!(60))
    } else if p > 1.0 {
        (dec!(50), dec!(250))
    } else if p > 0.1 {
        (dec!(500), dec!(2500))
    } else {
        (dec!(5000), dec!(25000))
    }
}

/// Format a price as a fixed-point string at display precision.
pub fn format_price(price: Decimal) -> String {
    format!("{:.*}", price_precision(price) as usize, price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_precision_table() {
        assert_eq!(price_precision(dec!(8500)), 2);
        assert_eq!(price_precision(dec!(125.5)), 2);
        assert_eq!(price_precision(dec!(45.5)), 3);
        assert_eq!(price_precision(dec!(0.085)), 4);
        assert_eq!(price_precision(dec!(0.0085)), 6);
        assert_eq!(price_precision(dec!(0.000085)), 8);
    }

    #[test]
    fn test_qty_precision_table() {
        assert_eq!(qty_precision(dec!(50000)), 4);
        assert_eq!(qty_precision(dec!(500)), 3);
        assert_eq!(qty_precision(dec!(50)), 2);
        assert_eq!(qty_precision(dec!(5)), 2);
        assert_eq!(qty_precision(dec!(0.5)), 0);
    }

    #[test]
    fn test_round_price_merges_dust_levels() {
        // 1.258 and 1.2580001 must collapse onto one displayed level
        assert_eq!(round_price(dec!(1.258)), round_price(dec!(1.2580001)));
    }

    #[test]
    fn test_round_qty_uses_price_bucket() {
        assert_eq!(round_qty(dec!(1.23456), dec!(50000)), dec!(1.2346));
        assert_eq!(round_qty(dec!(123.456), dec!(0.5)), dec!(123));
    }

    #[test]
    fn test_qty_range_buckets() {
        let (lo, hi) = qty_range_for_price(dec!(42000));
        assert_eq!((lo, hi), (dec!(0.01), dec!(0.06)));
        let (lo, hi) = qty_range_for_price(dec!(0.05));
        assert_eq!((lo, hi), (dec!(5000), dec!(25000)));
    }

    #[test]
    fn test_format_price_fixed_point() {
        assert_eq!(format_price(dec!(8500)), "8500.00");
        assert_eq!(format_price(dec!(45.5)), "45.500");
    }
}

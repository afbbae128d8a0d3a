use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{RecorderError, Result};
use crate::model::RawLevel;

/// Parses a wire `[price_str, qty_str]` pair into a `RawLevel`, preserving
/// the original strings for checksum construction (§3).
pub fn level_from_strs(price: &str, qty: &str) -> Result<RawLevel> {
    let price_dec = Decimal::from_str(price)
        .map_err(|e| RecorderError::Decode(format!("bad price {price:?}: {e}")))?;
    let qty_dec = Decimal::from_str(qty)
        .map_err(|e| RecorderError::Decode(format!("bad qty {qty:?}: {e}")))?;
    Ok(RawLevel {
        price: price_dec,
        qty: qty_dec,
        raw_price: price.to_string(),
        raw_qty: qty.to_string(),
    })
}

/// Parses a `[price_num, qty_num]` JSON pair (Binance's REST snapshot shape,
/// which is a two-element array of JSON strings) into a `RawLevel`.
pub fn level_from_json_pair(pair: &[String; 2]) -> Result<RawLevel> {
    level_from_strs(&pair[0], &pair[1])
}

/// Strips the decimal point and any leading zeros from a wire-exact price or
/// quantity string, as Kraken's and Bitfinex's checksum algorithms require
/// (§4.4). A bare `"0"` or `"0.0"` collapses to `"0"`.
pub fn checksum_token(raw: &str) -> String {
    let no_dot: String = raw.chars().filter(|c| *c != '.').collect();
    let trimmed = no_dot.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_wire_exact_strings() {
        let lvl = level_from_strs("50001.00", "0.00000000").unwrap();
        assert_eq!(lvl.raw_price, "50001.00");
        assert_eq!(lvl.raw_qty, "0.00000000");
        assert!(lvl.qty.is_zero());
    }

    #[test]
    fn rejects_garbage() {
        assert!(level_from_strs("not-a-number", "1").is_err());
    }

    #[test]
    fn checksum_token_strips_dot_and_leading_zeros() {
        assert_eq!(checksum_token("5541.30000"), "554130000");
        assert_eq!(checksum_token("0.00000000"), "0");
        assert_eq!(checksum_token("0005.10"), "510");
    }
}

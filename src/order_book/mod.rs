pub mod book_side;

use rust_decimal::Decimal;

use crate::error::{RecorderError, Result};
use book_side::{BookSide, Level, Side};

/// The in-memory L2 order book for a single symbol (C1, §4.1).
///
/// Owned exclusively by the orchestrator's dispatch task for the lifetime of
/// the run (§3 "Ownership"); replaced wholesale on every (re)snapshot,
/// mutated in place by diffs in between.
#[derive(Debug)]
pub struct OrderBook {
    bids: BookSide,
    asks: BookSide,
    valid: bool,
    epoch_id: u64,
    last_applied_u: Option<u64>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BookSide::new(Side::Bid),
            asks: BookSide::new(Side::Ask),
            valid: false,
            epoch_id: 0,
            last_applied_u: None,
        }
    }

    pub fn epoch_id(&self) -> u64 {
        self.epoch_id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_applied_u(&self) -> Option<u64> {
        self.last_applied_u
    }

    pub fn set_last_applied_u(&mut self, u: u64) {
        self.last_applied_u = Some(u);
    }

    /// Wholesale replace on (re)snapshot. Increments `epoch_id` and marks the
    /// book valid pending the caller's own crossed-book check (§4.1, I4).
    pub fn replace(
        &mut self,
        bids: impl IntoIterator<Item = (Decimal, Decimal, String, String)>,
        asks: impl IntoIterator<Item = (Decimal, Decimal, String, String)>,
        last_applied_u: Option<u64>,
    ) {
        self.bids.replace(bids);
        self.asks.replace(asks);
        self.epoch_id += 1;
        self.valid = true;
        self.last_applied_u = last_applied_u;
    }

    /// Applies a batch of bid/ask deltas from a diff (§4.1 "Apply semantics").
    pub fn apply_side(
        &mut self,
        side: Side,
        levels: impl IntoIterator<Item = (Decimal, Decimal, String, String)>,
    ) {
        let target = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        for (price, qty, raw_price, raw_qty) in levels {
            target.apply(price, qty, raw_price, raw_qty);
        }
    }

    pub fn trim_to_depth(&mut self, depth: usize) {
        self.bids.trim_to_depth(depth);
        self.asks.trim_to_depth(depth);
    }

    pub fn best_bid(&self) -> Option<(Decimal, &Level)> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<(Decimal, &Level)> {
        self.asks.best()
    }

    pub fn top_n(&self, n: usize) -> (Vec<(Decimal, &Level)>, Vec<(Decimal, &Level)>) {
        (self.bids.top_n(n), self.asks.top_n(n))
    }

    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    /// A crossed book (`best_bid >= best_ask`) after an apply is a hard fault
    /// that forces resync (§4.1, §7 `CrossedBook`). Also marks the book
    /// invalid so callers cannot keep persisting from it.
    pub fn validate_crossed(&mut self) -> Result<()> {
        if let (Some((bid_price, _)), Some((ask_price, _))) = (self.best_bid(), self.best_ask()) {
            if bid_price >= ask_price {
                self.valid = false;
                return Err(RecorderError::CrossedBook {
                    best_bid: bid_price.to_string(),
                    best_ask: ask_price.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn replace_bumps_epoch_and_validity() {
        let mut book = OrderBook::new();
        assert_eq!(book.epoch_id(), 0);
        assert!(!book.is_valid());

        book.replace(
            vec![(d("100"), d("1"), "100".into(), "1".into())],
            vec![(d("101"), d("1"), "101".into(), "1".into())],
            Some(42),
        );

        assert_eq!(book.epoch_id(), 1);
        assert!(book.is_valid());
        assert_eq!(book.last_applied_u(), Some(42));

        book.replace(std::iter::empty(), std::iter::empty(), None);
        assert_eq!(book.epoch_id(), 2);
    }

    #[test]
    fn crossed_book_is_detected_and_invalidates() {
        let mut book = OrderBook::new();
        book.replace(
            vec![(d("100"), d("1"), "100".into(), "1".into())],
            vec![(d("99"), d("1"), "99".into(), "1".into())],
            None,
        );
        assert!(book.validate_crossed().is_err());
        assert!(!book.is_valid());
    }

    #[test]
    fn non_crossed_book_passes() {
        let mut book = OrderBook::new();
        book.replace(
            vec![(d("99"), d("1"), "99".into(), "1".into())],
            vec![(d("100"), d("1"), "100".into(), "1".into())],
            None,
        );
        assert!(book.validate_crossed().is_ok());
        assert!(book.is_valid());
    }

    #[test]
    fn apply_side_overwrites_and_deletes() {
        let mut book = OrderBook::new();
        book.replace(
            vec![(d("100"), d("1"), "100".into(), "1".into())],
            vec![],
            Some(1),
        );
        book.apply_side(
            Side::Bid,
            vec![(d("100"), d("5"), "100".into(), "5".into())],
        );
        assert_eq!(book.best_bid().unwrap().1.qty, d("5"));

        book.apply_side(
            Side::Bid,
            vec![(d("100"), d("0"), "100".into(), "0".into())],
        );
        assert!(book.best_bid().is_none());
    }
}

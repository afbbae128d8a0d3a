use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// One tracked price level. `raw_price`/`raw_qty` preserve the exact wire
/// string the exchange sent (leading zeros, trailing zeros, decimal point
/// placement) because checksum construction for Kraken/Bitfinex is defined
/// over those bytes, not a renormalized decimal (§3 "Numeric representation").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub qty: Decimal,
    pub raw_price: String,
    pub raw_qty: String,
}

/// Which side of the book a price belongs to; determines sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// A single ordered price→level mapping. Bids and asks are both represented
/// with this type; `Side` only affects how `top_n`/`best` iterate the
/// underlying `BTreeMap`, which is always stored ascending by price (§4.1).
#[derive(Debug, Clone, Default)]
pub struct BookSide {
    levels: BTreeMap<Decimal, Level>,
    side: Option<Side>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            levels: BTreeMap::new(),
            side: Some(side),
        }
    }

    /// Applies one `(price, qty)` update. `qty == 0` deletes the level;
    /// otherwise the level is overwritten (§4.1 "Apply semantics").
    pub fn apply(&mut self, price: Decimal, qty: Decimal, raw_price: String, raw_qty: String) {
        if qty.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(
                price,
                Level {
                    qty,
                    raw_price,
                    raw_qty,
                },
            );
        }
    }

    /// Wholesale replace, used on (re)snapshot.
    pub fn replace(&mut self, levels: impl IntoIterator<Item = (Decimal, Decimal, String, String)>) {
        self.levels.clear();
        for (price, qty, raw_price, raw_qty) in levels {
            if !qty.is_zero() {
                self.levels.insert(
                    price,
                    Level {
                        qty,
                        raw_price,
                        raw_qty,
                    },
                );
            }
        }
    }

    /// Drops all levels beyond the best `depth`, used by the Kraken checksum
    /// engine which must track exactly the subscribed depth (§4.4).
    pub fn trim_to_depth(&mut self, depth: usize) {
        match self.side {
            Some(Side::Bid) => {
                while self.levels.len() > depth {
                    let worst = *self.levels.keys().next().unwrap();
                    self.levels.remove(&worst);
                }
            }
            Some(Side::Ask) | None => {
                while self.levels.len() > depth {
                    let worst = *self.levels.keys().next_back().unwrap();
                    self.levels.remove(&worst);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Returns up to `n` levels in best-first order (highest price first for
    /// bids, lowest price first for asks).
    pub fn top_n(&self, n: usize) -> Vec<(Decimal, &Level)> {
        match self.side {
            Some(Side::Bid) => self
                .levels
                .iter()
                .rev()
                .take(n)
                .map(|(p, l)| (*p, l))
                .collect(),
            Some(Side::Ask) | None => self
                .levels
                .iter()
                .take(n)
                .map(|(p, l)| (*p, l))
                .collect(),
        }
    }

    pub fn best(&self) -> Option<(Decimal, &Level)> {
        self.top_n(1).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn bids_sort_descending() {
        let mut side = BookSide::new(Side::Bid);
        side.apply(d("100.0"), d("1"), "100.0".into(), "1".into());
        side.apply(d("101.0"), d("1"), "101.0".into(), "1".into());
        side.apply(d("99.5"), d("1"), "99.5".into(), "1".into());

        let top = side.top_n(3);
        let prices: Vec<Decimal> = top.iter().map(|(p, _)| *p).collect();
        assert_eq!(prices, vec![d("101.0"), d("100.0"), d("99.5")]);
        assert_eq!(side.best().unwrap().0, d("101.0"));
    }

    #[test]
    fn asks_sort_ascending() {
        let mut side = BookSide::new(Side::Ask);
        side.apply(d("100.0"), d("1"), "100.0".into(), "1".into());
        side.apply(d("101.0"), d("1"), "101.0".into(), "1".into());
        side.apply(d("99.5"), d("1"), "99.5".into(), "1".into());

        let top = side.top_n(3);
        let prices: Vec<Decimal> = top.iter().map(|(p, _)| *p).collect();
        assert_eq!(prices, vec![d("99.5"), d("100.0"), d("101.0")]);
        assert_eq!(side.best().unwrap().0, d("99.5"));
    }

    #[test]
    fn zero_qty_deletes_level() {
        let mut side = BookSide::new(Side::Bid);
        side.apply(d("100.0"), d("1"), "100.0".into(), "1".into());
        assert_eq!(side.len(), 1);
        side.apply(d("100.0"), d("0"), "100.0".into(), "0.00000000".into());
        assert_eq!(side.len(), 0);
    }

    #[test]
    fn trim_to_depth_drops_worst_bid() {
        let mut side = BookSide::new(Side::Bid);
        for p in ["100", "101", "99", "98", "102"] {
            side.apply(d(p), d("1"), p.into(), "1".into());
        }
        side.trim_to_depth(3);
        let prices: Vec<Decimal> = side.top_n(10).into_iter().map(|(p, _)| p).collect();
        assert_eq!(prices, vec![d("102"), d("101"), d("100")]);
    }

    #[test]
    fn trim_to_depth_drops_worst_ask() {
        let mut side = BookSide::new(Side::Ask);
        for p in ["100", "101", "99", "98", "102"] {
            side.apply(d(p), d("1"), p.into(), "1".into());
        }
        side.trim_to_depth(3);
        let prices: Vec<Decimal> = side.top_n(10).into_iter().map(|(p, _)| p).collect();
        assert_eq!(prices, vec![d("98"), d("99"), d("100")]);
    }
}

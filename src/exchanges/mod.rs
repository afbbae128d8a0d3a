pub mod bitfinex;
pub mod binance;
pub mod exchange_utils;
pub mod kraken;

use std::fmt;
use std::str::FromStr;

use crate::error::RecorderError;

/// The supported exchanges (§6 `EXCHANGE`). A sum type replaces the source's
/// string-keyed dispatch (§9 "Sum-type discrimination").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Binance,
    Kraken,
    Bitfinex,
}

impl Exchange {
    /// Whether this exchange bridges via sequence ids (C3-seq) or verifies
    /// via CRC32 checksum (C3-cs).
    pub fn uses_checksum(&self) -> bool {
        matches!(self, Exchange::Kraken | Exchange::Bitfinex)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Kraken => "kraken",
            Exchange::Bitfinex => "bitfinex",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "kraken" => Ok(Exchange::Kraken),
            "bitfinex" => Ok(Exchange::Bitfinex),
            other => Err(RecorderError::ConfigInvalid(format!(
                "unknown exchange {other:?}, expected one of binance|kraken|bitfinex"
            ))),
        }
    }
}

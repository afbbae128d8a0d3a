use rust_decimal::Decimal;

/// One (price, qty) level update carried on a diff, with the wire-exact
/// strings preserved for checksum construction (§3).
#[derive(Debug, Clone)]
pub struct RawLevel {
    pub price: Decimal,
    pub qty: Decimal,
    pub raw_price: String,
    pub raw_qty: String,
}

impl RawLevel {
    /// Adapts to the `(price, qty, raw_price, raw_qty)` shape `OrderBook`'s
    /// apply/replace methods take.
    pub fn into_tuple(self) -> (Decimal, Decimal, String, String) {
        (self.price, self.qty, self.raw_price, self.raw_qty)
    }
}

/// Exchange-normalized diff message (§3). `first_update_id`/`last_update_id`
/// are zero sentinels for checksum exchanges, which have no sequence ids.
#[derive(Debug, Clone)]
pub struct DiffMessage {
    pub event_time_ms: i64,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
    pub checksum: Option<u32>,
    pub raw: String,
}

/// Trade side as printed on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Normalized trade print (§3). `recv_time_ms`/`recv_seq` are stamped by the
/// orchestrator at ingress, not by the exchange parser.
#[derive(Debug, Clone)]
pub struct TradePrint {
    pub event_time_ms: i64,
    pub trade_id: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: TradeSide,
    pub is_buyer_maker: Option<bool>,
    pub raw: String,
}

/// Authoritative book snapshot fetched by C4 (§4.5).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
    /// `0` sentinel for checksum exchanges, which have no sequence ids.
    pub last_update_id: u64,
    pub checksum: Option<u32>,
    pub raw_bytes: Vec<u8>,
}

/// A tagged inbound frame, as produced by C2 and classified by the exchange
/// parser before reaching C3 (§4.2).
#[derive(Debug, Clone)]
pub enum Frame {
    Depth(DiffMessage),
    Trade(TradePrint),
    Snapshot(Snapshot),
    /// A standalone checksum frame (Bitfinex's separate `cs` message).
    Checksum(u32),
    Heartbeat,
    Unknown(String),
}

/// A reconstructed book top, as published on the in-process update channel
/// (§1 "the core exposes a typed stream of reconstructed book states and
/// trades to those collaborators"). Carries the same `(recv_time_ms,
/// recv_seq)` ordering pair every persisted row does, so a collaborator can
/// correlate a live update with its eventual row in `orderbook_ws_depth_*`.
#[derive(Debug, Clone)]
pub struct BookTopUpdate {
    pub recv_time_ms: i64,
    pub recv_seq: u64,
    pub epoch_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// One item on the in-process broadcast stream C6 exposes to collaborators:
/// either a reconstructed book top taken immediately after a successful
/// apply, or a normalized trade print, each stamped with the same
/// `(recv_time_ms, recv_seq)` pair the writer fabric persists.
#[derive(Debug, Clone)]
pub enum RecorderUpdate {
    BookTop(BookTopUpdate),
    Trade {
        recv_time_ms: i64,
        recv_seq: u64,
        trade: TradePrint,
    },
}

pub mod snapshot;

use serde::Deserialize;

use crate::error::{RecorderError, Result};
use crate::exchanges::exchange_utils::level_from_json_pair;
use crate::model::{DiffMessage, Frame, TradePrint, TradeSide};

const WS_BASE_ENDPOINT: &str = "wss://stream.binance.com:9443/stream?streams=";

/// Binance combined-stream WS URL subscribing to depth + trade channels for
/// `pair` (e.g. `btcusdt`), per §4.2 "subscribe to depth + trade channels
/// per exchange".
pub fn ws_url(pair_lower: &str) -> String {
    format!("{WS_BASE_ENDPOINT}{pair_lower}@depth/{pair_lower}@trade")
}

#[derive(Deserialize)]
struct Envelope {
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct EventTag {
    #[serde(rename = "e")]
    event: String,
}

#[derive(Deserialize)]
struct DepthUpdateWire {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    last_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Deserialize)]
struct TradeWire {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

/// Parses a raw Binance combined-stream text frame into a normalized
/// `Frame` (§4.2 "Parse each inbound frame into a tagged message").
pub fn parse_frame(text: &str) -> Result<Frame> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let tag: EventTag = serde_json::from_value(envelope.data.clone())?;

    match tag.event.as_str() {
        "depthUpdate" => {
            let wire: DepthUpdateWire = serde_json::from_value(envelope.data)?;
            let bids = wire
                .bids
                .iter()
                .map(level_from_json_pair)
                .collect::<Result<Vec<_>>>()?;
            let asks = wire
                .asks
                .iter()
                .map(level_from_json_pair)
                .collect::<Result<Vec<_>>>()?;
            Ok(Frame::Depth(DiffMessage {
                event_time_ms: wire.event_time,
                first_update_id: wire.first_update_id,
                last_update_id: wire.last_update_id,
                bids,
                asks,
                checksum: None,
                raw: text.to_string(),
            }))
        }
        "trade" => {
            let wire: TradeWire = serde_json::from_value(envelope.data)?;
            let price = level_from_json_pair(&[wire.price.clone(), "0".to_string()])?.price;
            let qty = level_from_json_pair(&["0".to_string(), wire.qty.clone()])?.qty;
            // Binance's `m` flag means the buyer is the market maker, i.e.
            // the taker was a seller.
            let side = if wire.is_buyer_maker {
                TradeSide::Sell
            } else {
                TradeSide::Buy
            };
            Ok(Frame::Trade(TradePrint {
                event_time_ms: wire.event_time,
                trade_id: wire.trade_id.to_string(),
                price,
                qty,
                side,
                is_buyer_maker: Some(wire.is_buyer_maker),
                raw: text.to_string(),
            }))
        }
        other => Err(RecorderError::Decode(format!(
            "unrecognized binance event {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depth_update() {
        let text = r#"{"stream":"btcusdt@depth","data":{"e":"depthUpdate","E":123456789,"U":100,"u":105,"b":[["50000.00","1.5"]],"a":[["50010.00","2.0"]]}}"#;
        let frame = parse_frame(text).unwrap();
        match frame {
            Frame::Depth(diff) => {
                assert_eq!(diff.first_update_id, 100);
                assert_eq!(diff.last_update_id, 105);
                assert_eq!(diff.bids.len(), 1);
                assert_eq!(diff.asks[0].raw_price, "50010.00");
            }
            _ => panic!("expected depth frame"),
        }
    }

    #[test]
    fn parses_trade() {
        let text = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":123456789,"t":999,"p":"50000.50","q":"0.01","m":true}}"#;
        let frame = parse_frame(text).unwrap();
        match frame {
            Frame::Trade(trade) => {
                assert_eq!(trade.trade_id, "999");
                assert_eq!(trade.side, TradeSide::Sell);
            }
            _ => panic!("expected trade frame"),
        }
    }

    #[test]
    fn ws_url_builds_combined_stream() {
        assert_eq!(
            ws_url("btcusdt"),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@depth/btcusdt@trade"
        );
    }

    #[test]
    fn rejects_unknown_event() {
        let text = r#"{"stream":"x","data":{"e":"24hrTicker"}}"#;
        assert!(parse_frame(text).is_err());
    }
}

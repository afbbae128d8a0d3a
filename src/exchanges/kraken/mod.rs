use serde::Deserialize;
use serde_json::Value;

use crate::error::{RecorderError, Result};
use crate::exchanges::exchange_utils::{checksum_token, level_from_strs};
use crate::model::{DiffMessage, Frame, RawLevel, TradePrint, TradeSide};

pub const WS_URL: &str = "wss://ws.kraken.com";

/// Builds the `subscribe` message for Kraken's `book` channel (§4.2, §6
/// `DEPTH`). Kraken's public book channel carries both the initial snapshot
/// and all subsequent diffs in-band, so there is no separate REST snapshot
/// fetch for this exchange (§4.5 "Kraken/Bitfinex snapshot via the first
/// book message").
pub fn subscribe_message(pairs: &[String], depth: usize) -> String {
    serde_json::json!({
        "event": "subscribe",
        "pair": pairs,
        "subscription": { "name": "book", "depth": depth },
    })
    .to_string()
}

pub fn trade_subscribe_message(pairs: &[String]) -> String {
    serde_json::json!({
        "event": "subscribe",
        "pair": pairs,
        "subscription": { "name": "trade" },
    })
    .to_string()
}

#[derive(Deserialize)]
struct EventFrame {
    event: String,
}

/// Parses one raw Kraken WS text frame into zero or more normalized
/// `Frame`s. Kraken bundles multiple trades into a single wire message, and
/// status/heartbeat frames carry no book or trade data at all (§4.2).
pub fn parse_frame(text: &str) -> Result<Vec<Frame>> {
    if let Ok(ev) = serde_json::from_str::<EventFrame>(text) {
        return Ok(match ev.event.as_str() {
            "heartbeat" => vec![Frame::Heartbeat],
            _ => vec![Frame::Unknown(text.to_string())],
        });
    }

    let value: Value = serde_json::from_str(text)?;
    let arr = value
        .as_array()
        .ok_or_else(|| RecorderError::Decode(format!("kraken frame is not an array: {text}")))?;
    if arr.len() < 3 {
        return Err(RecorderError::Decode(format!(
            "kraken frame too short: {text}"
        )));
    }
    let channel_name = arr[arr.len() - 2]
        .as_str()
        .unwrap_or_default();
    let payload = &arr[1];

    if channel_name.starts_with("book-") {
        parse_book_payload(payload, text)
    } else if channel_name == "trade" {
        parse_trade_payload(payload, text)
    } else {
        Ok(vec![Frame::Unknown(text.to_string())])
    }
}

fn levels_from_array(arr: &[Value]) -> Result<Vec<RawLevel>> {
    arr.iter()
        .map(|entry| {
            let e = entry.as_array().ok_or_else(|| {
                RecorderError::Decode("kraken level entry is not an array".to_string())
            })?;
            let price = e[0]
                .as_str()
                .ok_or_else(|| RecorderError::Decode("kraken level price not a string".to_string()))?;
            let qty = e[1]
                .as_str()
                .ok_or_else(|| RecorderError::Decode("kraken level qty not a string".to_string()))?;
            level_from_strs(price, qty)
        })
        .collect()
}

fn parse_book_payload(payload: &Value, raw: &str) -> Result<Vec<Frame>> {
    let is_snapshot = payload.get("as").is_some() || payload.get("bs").is_some();

    if is_snapshot {
        let asks = payload
            .get("as")
            .and_then(Value::as_array)
            .map(|a| levels_from_array(a))
            .transpose()?
            .unwrap_or_default();
        let bids = payload
            .get("bs")
            .and_then(Value::as_array)
            .map(|a| levels_from_array(a))
            .transpose()?
            .unwrap_or_default();
        return Ok(vec![Frame::Snapshot(crate::model::Snapshot {
            bids,
            asks,
            last_update_id: 0,
            checksum: None,
            raw_bytes: raw.as_bytes().to_vec(),
        })]);
    }

    let asks = payload
        .get("a")
        .and_then(Value::as_array)
        .map(|a| levels_from_array(a))
        .transpose()?
        .unwrap_or_default();
    let bids = payload
        .get("b")
        .and_then(Value::as_array)
        .map(|a| levels_from_array(a))
        .transpose()?
        .unwrap_or_default();
    let checksum = payload
        .get("c")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<u32>().ok());

    Ok(vec![Frame::Depth(DiffMessage {
        event_time_ms: 0,
        first_update_id: 0,
        last_update_id: 0,
        bids,
        asks,
        checksum,
        raw: raw.to_string(),
    })])
}

fn parse_trade_payload(payload: &Value, raw: &str) -> Result<Vec<Frame>> {
    let entries = payload
        .as_array()
        .ok_or_else(|| RecorderError::Decode("kraken trade payload is not an array".to_string()))?;
    entries
        .iter()
        .map(|entry| {
            let e = entry
                .as_array()
                .ok_or_else(|| RecorderError::Decode("kraken trade entry is not an array".to_string()))?;
            let price = e[0].as_str().unwrap_or("0");
            let qty = e[1].as_str().unwrap_or("0");
            let time_s: f64 = e[2].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            let side_tag = e[3].as_str().unwrap_or("b");
            let level = level_from_strs(price, qty)?;
            let side = if side_tag == "s" {
                TradeSide::Sell
            } else {
                TradeSide::Buy
            };
            Ok(Frame::Trade(TradePrint {
                event_time_ms: (time_s * 1000.0) as i64,
                trade_id: String::new(),
                price: level.price,
                qty: level.qty,
                side,
                is_buyer_maker: None,
                raw: raw.to_string(),
            }))
        })
        .collect()
}

/// Constructs Kraken's checksum input string (§4.4): the top 10 ask levels
/// ascending by price, then the top 10 bid levels descending by price, each
/// level contributing its wire-exact price then quantity with the decimal
/// point and leading zeros stripped, all concatenated with no separators.
pub fn checksum_string(top_asks: &[(&str, &str)], top_bids: &[(&str, &str)]) -> String {
    let mut s = String::new();
    for (price, qty) in top_asks.iter().take(10) {
        s.push_str(&checksum_token(price));
        s.push_str(&checksum_token(qty));
    }
    for (price, qty) in top_bids.iter().take(10) {
        s.push_str(&checksum_token(price));
        s.push_str(&checksum_token(qty));
    }
    s
}

pub fn compute_checksum(top_asks: &[(&str, &str)], top_bids: &[(&str, &str)]) -> u32 {
    crc32fast::hash(checksum_string(top_asks, top_bids).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_payload() {
        let text = r#"[340,{"as":[["5541.30000","2.50700000","1534614248.456738"]],"bs":[["5541.20000","1.52900000","1534614248.456738"]]},"book-10","XBT/USD"]"#;
        let frames = parse_frame(text).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Snapshot(s) => {
                assert_eq!(s.asks.len(), 1);
                assert_eq!(s.bids.len(), 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn parses_update_payload_with_checksum() {
        let text = r#"[340,{"a":[["5541.30000","2.50700000","1534614248.456738"]],"c":"974942666"},"book-10","XBT/USD"]"#;
        let frames = parse_frame(text).unwrap();
        match &frames[0] {
            Frame::Depth(d) => {
                assert_eq!(d.asks.len(), 1);
                assert_eq!(d.checksum, Some(974942666));
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn parses_trade_payload_with_multiple_prints() {
        let text = r#"[340,[["5541.20000","0.15850568","1534614057.321597","s","l",""],["5541.30000","0.25000000","1534614058.000000","b","m",""]],"trade","XBT/USD"]"#;
        let frames = parse_frame(text).unwrap();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Trade(t) => assert_eq!(t.side, TradeSide::Sell),
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn checksum_string_matches_expected_order() {
        let asks = [("5541.30000", "2.50700000")];
        let bids = [("5541.20000", "1.52900000")];
        let s = checksum_string(&asks, &bids);
        assert_eq!(s, "554130000250700000554120000152900000");
    }

    #[test]
    fn heartbeat_frame_is_recognized() {
        let frames = parse_frame(r#"{"event":"heartbeat"}"#).unwrap();
        assert!(matches!(frames[0], Frame::Heartbeat));
    }
}

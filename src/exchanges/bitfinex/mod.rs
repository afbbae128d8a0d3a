use serde_json::Value;

use crate::error::{RecorderError, Result};
use crate::exchanges::exchange_utils::level_from_strs;
use crate::model::{DiffMessage, Frame, RawLevel, TradePrint, TradeSide};

pub const WS_URL: &str = "wss://api-pub.bitfinex.com/ws/2";

/// Builds the `subscribe` message for Bitfinex's raw `book` channel (§4.2,
/// §6 `DEPTH`). Like Kraken, Bitfinex's book channel carries the initial
/// snapshot in-band as the first payload, so C4 has no REST leg for this
/// exchange (§4.5).
pub fn book_subscribe_message(symbol: &str, depth: usize) -> String {
    serde_json::json!({
        "event": "subscribe",
        "channel": "book",
        "symbol": symbol,
        "prec": "P0",
        "freq": "F0",
        "len": depth.to_string(),
    })
    .to_string()
}

pub fn trades_subscribe_message(symbol: &str) -> String {
    serde_json::json!({
        "event": "subscribe",
        "channel": "trades",
        "symbol": symbol,
    })
    .to_string()
}

/// Parses one raw Bitfinex WS text frame. Bitfinex multiplexes book
/// snapshots, book updates, standalone checksum frames, heartbeats, and
/// trade events all as bare JSON arrays keyed by channel id, which the
/// caller is expected to have already resolved to a channel kind via the
/// `subscribed` event (§4.2); here we classify by shape alone, which is
/// sufficient to distinguish book frames from trade frames from checksum
/// frames.
pub fn parse_frame(text: &str) -> Result<Vec<Frame>> {
    if text.contains("\"event\"") {
        return Ok(vec![Frame::Unknown(text.to_string())]);
    }

    let value: Value = serde_json::from_str(text)?;
    let arr = value
        .as_array()
        .ok_or_else(|| RecorderError::Decode(format!("bitfinex frame is not an array: {text}")))?;
    if arr.len() < 2 {
        return Err(RecorderError::Decode(format!(
            "bitfinex frame too short: {text}"
        )));
    }

    if let Some("hb") = arr[1].as_str() {
        return Ok(vec![Frame::Heartbeat]);
    }
    if let Some("cs") = arr[1].as_str() {
        let checksum = arr
            .get(2)
            .and_then(Value::as_i64)
            .ok_or_else(|| RecorderError::Decode("bitfinex cs frame missing value".to_string()))?;
        return Ok(vec![Frame::Checksum(checksum as u32)]);
    }
    if let Some(tag @ ("te" | "tu")) = arr[1].as_str() {
        let entry = arr
            .get(2)
            .and_then(Value::as_array)
            .ok_or_else(|| RecorderError::Decode("bitfinex trade frame missing entry".to_string()))?;
        // `tu` is the confirmed duplicate of `te`; only record the first.
        if tag == "tu" {
            return Ok(vec![]);
        }
        return Ok(vec![trade_from_entry(entry, text)?]);
    }

    // Bitfinex sends book updates in two equivalent shapes: nested
    // `[chanId, [price, count, amount]]` and flattened
    // `[chanId, price, count, amount]` (§4.4 "Update shape quirks").
    if arr.len() == 4 && arr[1].is_number() && arr[2].is_number() && arr[3].is_number() {
        return Ok(vec![depth_from_row(&arr[1..4], text)?]);
    }

    let payload = &arr[1];
    if let Some(rows) = payload.as_array() {
        if rows.first().map(|r| r.is_array()).unwrap_or(false) {
            return Ok(vec![snapshot_from_rows(rows, text)?]);
        }
        if is_numeric_row(rows) {
            return Ok(vec![depth_from_row(rows, text)?]);
        }
    }

    Ok(vec![Frame::Unknown(text.to_string())])
}

fn is_numeric_row(row: &[Value]) -> bool {
    row.len() == 3 && row.iter().all(|v| v.is_number())
}

/// Renders a JSON number `Value` back to the exact digit sequence the
/// exchange sent. With `serde_json`'s `arbitrary_precision` feature, numbers
/// are held as their original textual form rather than round-tripped
/// through `f64`, which would silently rewrite e.g. `50001.0` to `50001`
/// and corrupt Bitfinex's checksum input (§3, §4.4 "Preserve exchange
/// numeric formatting verbatim").
fn number_token(value: &Value) -> Result<String> {
    if value.is_number() {
        Ok(value.to_string())
    } else {
        Err(RecorderError::Decode(format!(
            "bitfinex numeric field is not a number: {value}"
        )))
    }
}

fn row_to_level(row: &[Value]) -> Result<(RawLevel, i64)> {
    let price = number_token(&row[0])?;
    let count = row[1].as_i64().unwrap_or(0);
    let amount = number_token(&row[2])?;
    let level = level_from_strs(&price, &amount)?;
    Ok((level, count))
}

fn snapshot_from_rows(rows: &[Value], raw: &str) -> Result<Frame> {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for row in rows {
        let row = row
            .as_array()
            .ok_or_else(|| RecorderError::Decode("bitfinex book row is not an array".to_string()))?;
        let (mut level, count) = row_to_level(row)?;
        if count == 0 {
            continue;
        }
        if level.qty.is_sign_negative() {
            level.qty = level.qty.abs();
            level.raw_qty = level.raw_qty.trim_start_matches('-').to_string();
            asks.push(level);
        } else {
            bids.push(level);
        }
    }
    Ok(Frame::Snapshot(crate::model::Snapshot {
        bids,
        asks,
        last_update_id: 0,
        checksum: None,
        raw_bytes: raw.as_bytes().to_vec(),
    }))
}

fn depth_from_row(row: &[Value], raw: &str) -> Result<Frame> {
    let (mut level, count) = row_to_level(row)?;
    let mut bids = Vec::new();
    let mut asks = Vec::new();

    if count == 0 {
        // Deletion: qty is always +/-1 on the wire to signal which side.
        if level.qty.is_sign_negative() {
            level.qty = rust_decimal::Decimal::ZERO;
            asks.push(level);
        } else {
            level.qty = rust_decimal::Decimal::ZERO;
            bids.push(level);
        }
    } else if level.qty.is_sign_negative() {
        level.qty = level.qty.abs();
        level.raw_qty = level.raw_qty.trim_start_matches('-').to_string();
        asks.push(level);
    } else {
        bids.push(level);
    }

    Ok(Frame::Depth(DiffMessage {
        event_time_ms: 0,
        first_update_id: 0,
        last_update_id: 0,
        bids,
        asks,
        checksum: None,
        raw: raw.to_string(),
    }))
}

fn trade_from_entry(entry: &[Value], raw: &str) -> Result<Frame> {
    let trade_id = entry.first().and_then(Value::as_i64).unwrap_or(0);
    let mts = entry.get(1).and_then(Value::as_i64).unwrap_or(0);
    let amount_negative = entry
        .get(2)
        .and_then(Value::as_f64)
        .map(|a| a < 0.0)
        .unwrap_or(false);
    let amount_token = entry
        .get(2)
        .map(number_token)
        .transpose()?
        .unwrap_or_else(|| "0".to_string());
    let amount_abs = amount_token.trim_start_matches('-').to_string();
    let price = entry
        .get(3)
        .map(number_token)
        .transpose()?
        .unwrap_or_else(|| "0".to_string());
    let level = level_from_strs(&price, &amount_abs)?;
    let side = if amount_negative {
        TradeSide::Sell
    } else {
        TradeSide::Buy
    };
    Ok(Frame::Trade(TradePrint {
        event_time_ms: mts,
        trade_id: trade_id.to_string(),
        price: level.price,
        qty: level.qty,
        side,
        is_buyer_maker: None,
        raw: raw.to_string(),
    }))
}

/// Constructs Bitfinex's checksum input string (§4.4): the top 25 bid/ask
/// pairs, index by index, each contributing `price:amount` for the bid then
/// `price:-amount` for the ask (ask amounts always negated), all joined
/// with `:`.
pub fn checksum_string(top_bids: &[(&str, &str)], top_asks: &[(&str, &str)]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for i in 0..25 {
        if let Some((price, amount)) = top_bids.get(i) {
            parts.push((*price).to_string());
            parts.push((*amount).to_string());
        }
        if let Some((price, amount)) = top_asks.get(i) {
            parts.push((*price).to_string());
            let negated = if let Some(stripped) = amount.strip_prefix('-') {
                stripped.to_string()
            } else {
                format!("-{amount}")
            };
            parts.push(negated);
        }
    }
    parts.join(":")
}

pub fn compute_checksum(top_bids: &[(&str, &str)], top_asks: &[(&str, &str)]) -> u32 {
    crc32fast::hash(checksum_string(top_bids, top_asks).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_with_mixed_sides() {
        let text = r#"[173904,[[50001.0,1,2.5],[50000.0,2,-1.5]]]"#;
        let frames = parse_frame(text).unwrap();
        match &frames[0] {
            Frame::Snapshot(s) => {
                assert_eq!(s.bids.len(), 1);
                assert_eq!(s.asks.len(), 1);
                assert!(s.asks[0].qty.is_sign_positive());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn deletion_row_zeroes_qty() {
        let text = r#"[173904,[50001.0,0,2.5]]"#;
        let frames = parse_frame(text).unwrap();
        match &frames[0] {
            Frame::Depth(d) => {
                assert_eq!(d.bids.len(), 1);
                assert!(d.bids[0].qty.is_zero());
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn flat_update_shape_is_equivalent_to_nested() {
        let text = r#"[173904,50001.0,2,2.5]"#;
        let frames = parse_frame(text).unwrap();
        match &frames[0] {
            Frame::Depth(d) => {
                assert_eq!(d.bids.len(), 1);
                assert_eq!(d.bids[0].raw_price, "50001.0");
                assert_eq!(d.bids[0].qty.to_string(), "2.5");
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn flat_update_shape_deletion() {
        let text = r#"[173904,50001.0,0,-2.5]"#;
        let frames = parse_frame(text).unwrap();
        match &frames[0] {
            Frame::Depth(d) => {
                assert_eq!(d.asks.len(), 1);
                assert!(d.asks[0].qty.is_zero());
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn checksum_frame_is_parsed() {
        let frames = parse_frame(r#"[173904,"cs",123456]"#).unwrap();
        assert!(matches!(frames[0], Frame::Checksum(123456)));
    }

    #[test]
    fn heartbeat_is_recognized() {
        let frames = parse_frame(r#"[173904,"hb"]"#).unwrap();
        assert!(matches!(frames[0], Frame::Heartbeat));
    }

    #[test]
    fn checksum_string_interleaves_and_negates_asks() {
        let bids = [("50000", "1.5")];
        let asks = [("50001", "2.5")];
        assert_eq!(checksum_string(&bids, &asks), "50000:1.5:50001:-2.5");
    }
}

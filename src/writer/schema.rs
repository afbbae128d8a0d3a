use std::path::Path;

use crate::error::{retry_disk_io, RecorderError, Result};

/// Current `schema_version` (§5 "Persisted schema"): version 2 introduced
/// the global `recv_seq` column across every stream.
pub const SCHEMA_VERSION: u32 = 2;

/// Writes `schema.json` describing the columns of every stream file in the
/// day directory (§4.6 "A `schema.json` file is written on startup").
pub fn write_schema(dir: &Path) -> Result<()> {
    let schema = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "streams": {
            "top_book": {
                "path": "orderbook_ws_depth_<SYM>_<YYYYMMDD>.csv.gz",
                "format": "csv",
                "columns": ["recv_time_ms", "recv_seq", "epoch_id", "event_time_ms", "side", "rank", "price", "qty"],
            },
            "trades": {
                "path": "trades_ws_<SYM>_<YYYYMMDD>.csv.gz",
                "format": "csv",
                "columns": ["recv_time_ms", "recv_seq", "event_time_ms", "trade_id", "price", "qty", "side", "is_buyer_maker"],
            },
            "events": {
                "path": "events_<SYM>_<YYYYMMDD>.csv.gz",
                "format": "csv",
                "columns": ["event_id", "recv_time_ms", "recv_seq", "run_id", "type", "epoch_id", "details_json"],
            },
            "gaps": {
                "path": "gaps_<SYM>_<YYYYMMDD>.csv.gz",
                "format": "csv",
                "columns": ["recv_time_ms", "recv_seq", "run_id", "epoch_id", "event", "details"],
            },
            "depth_diffs_raw": {
                "path": "diffs/depth_diffs_<SYM>_<YYYYMMDD>.ndjson.gz",
                "format": "ndjson",
                "columns": ["recv_time_ms", "recv_seq", "raw"],
            },
            "trades_raw": {
                "path": "trades/trades_ws_raw_<SYM>_<YYYYMMDD>.ndjson.gz",
                "format": "ndjson",
                "columns": ["recv_time_ms", "recv_seq", "raw"],
            },
            "snapshots": {
                "path": "snapshots/snapshot_<event_id>_<tag>.{csv,json}",
                "format": "csv+json pair",
                "columns": ["side", "rank", "price", "qty"],
            },
        },
    });

    let path = dir.join("schema.json");
    let body = serde_json::to_vec_pretty(&schema)?;
    retry_disk_io(|| std::fs::write(&path, &body)).map_err(|source| RecorderError::DiskIo {
        stream: super::WriterStream::Events,
        source,
    })
}

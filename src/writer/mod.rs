pub mod csv_writer;
pub mod ndjson_writer;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::{retry_disk_io, RecorderError, Result};
use crate::events::{EventRecord, GapRecord};

use csv_writer::CsvGzWriter;
use ndjson_writer::NdjsonGzWriter;

/// Which logical output stream an I/O error occurred on (§7 `DiskIo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStream {
    TopBook,
    Trades,
    Events,
    Gaps,
    DepthDiffsRaw,
    TradesRaw,
    Snapshot,
}

/// Buffering/feature knobs for the writer fabric (§4.6, §6).
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub orderbook_buffer_rows: usize,
    pub trades_buffer_rows: usize,
    pub flush_interval: Duration,
    pub ndjson_flush_bytes: usize,
    /// Gates both the raw-diff and raw-trade NDJSON streams (§6 `STORE_DEPTH_DIFFS`).
    pub store_depth_diffs: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            orderbook_buffer_rows: 200,
            trades_buffer_rows: 50,
            flush_interval: Duration::from_secs(5),
            ndjson_flush_bytes: 1 << 16,
            store_depth_diffs: true,
        }
    }
}

/// Owns every output stream for one symbol's trading-window session (C5,
/// §4.6). Opened once the window starts and the day directory is known;
/// closed (finalizing all gzip footers) at window end or on shutdown.
/// Owned exclusively by the orchestrator — no internal locking, matching
/// the single-threaded dispatch model (§5 "Shared-resource policy").
pub struct WriterFabric {
    day_dir: PathBuf,
    top_book: CsvGzWriter,
    trades: CsvGzWriter,
    events: CsvGzWriter,
    gaps: CsvGzWriter,
    depth_diffs_raw: Option<NdjsonGzWriter>,
    trades_raw: Option<NdjsonGzWriter>,
    config: WriterConfig,
}

impl WriterFabric {
    pub fn day_dir_for(base_dir: &Path, exchange: &str, symbol_fs: &str, date: NaiveDate) -> PathBuf {
        base_dir
            .join(exchange)
            .join(symbol_fs)
            .join(date.format("%Y%m%d").to_string())
    }

    pub fn open(
        base_dir: &Path,
        exchange: &str,
        symbol: &str,
        date: NaiveDate,
        config: WriterConfig,
    ) -> Result<Self> {
        let symbol_fs = sanitize_symbol(symbol);
        let day_dir = Self::day_dir_for(base_dir, exchange, &symbol_fs, date);
        retry_disk_io(|| std::fs::create_dir_all(&day_dir)).map_err(|source| RecorderError::DiskIo {
            stream: WriterStream::Events,
            source,
        })?;
        retry_disk_io(|| std::fs::create_dir_all(day_dir.join("diffs"))).map_err(|source| {
            RecorderError::DiskIo {
                stream: WriterStream::DepthDiffsRaw,
                source,
            }
        })?;
        retry_disk_io(|| std::fs::create_dir_all(day_dir.join("trades"))).map_err(|source| {
            RecorderError::DiskIo {
                stream: WriterStream::TradesRaw,
                source,
            }
        })?;
        retry_disk_io(|| std::fs::create_dir_all(day_dir.join("snapshots"))).map_err(|source| {
            RecorderError::DiskIo {
                stream: WriterStream::Snapshot,
                source,
            }
        })?;

        let ymd = date.format("%Y%m%d").to_string();

        let top_book = CsvGzWriter::open(
            &day_dir.join(format!("orderbook_ws_depth_{symbol_fs}_{ymd}.csv.gz")),
            &[
                "recv_time_ms",
                "recv_seq",
                "epoch_id",
                "event_time_ms",
                "side",
                "rank",
                "price",
                "qty",
            ],
            WriterStream::TopBook,
            config.orderbook_buffer_rows,
            config.flush_interval,
        )?;

        let trades = CsvGzWriter::open(
            &day_dir.join(format!("trades_ws_{symbol_fs}_{ymd}.csv.gz")),
            &[
                "recv_time_ms",
                "recv_seq",
                "event_time_ms",
                "trade_id",
                "price",
                "qty",
                "side",
                "is_buyer_maker",
            ],
            WriterStream::Trades,
            config.trades_buffer_rows,
            config.flush_interval,
        )?;

        let events = CsvGzWriter::open(
            &day_dir.join(format!("events_{symbol_fs}_{ymd}.csv.gz")),
            &[
                "event_id",
                "recv_time_ms",
                "recv_seq",
                "run_id",
                "type",
                "epoch_id",
                "details_json",
            ],
            WriterStream::Events,
            1,
            config.flush_interval,
        )?;

        let gaps = CsvGzWriter::open(
            &day_dir.join(format!("gaps_{symbol_fs}_{ymd}.csv.gz")),
            &["recv_time_ms", "recv_seq", "run_id", "epoch_id", "event", "details"],
            WriterStream::Gaps,
            1,
            config.flush_interval,
        )?;

        let depth_diffs_raw = if config.store_depth_diffs {
            Some(NdjsonGzWriter::open(
                &day_dir.join("diffs").join(format!("depth_diffs_{symbol_fs}_{ymd}.ndjson.gz")),
                WriterStream::DepthDiffsRaw,
                config.ndjson_flush_bytes,
            )?)
        } else {
            None
        };

        let trades_raw = if config.store_depth_diffs {
            Some(NdjsonGzWriter::open(
                &day_dir.join("trades").join(format!("trades_ws_raw_{symbol_fs}_{ymd}.ndjson.gz")),
                WriterStream::TradesRaw,
                config.ndjson_flush_bytes,
            )?)
        } else {
            None
        };

        schema::write_schema(&day_dir)?;

        Ok(Self {
            day_dir,
            top_book,
            trades,
            events,
            gaps,
            depth_diffs_raw,
            trades_raw,
            config,
        })
    }

    pub fn day_dir(&self) -> &Path {
        &self.day_dir
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write_top_book_row(
        &mut self,
        recv_time_ms: i64,
        recv_seq: u64,
        epoch_id: u64,
        event_time_ms: i64,
        side: &str,
        rank: usize,
        price: &str,
        qty: &str,
    ) -> Result<()> {
        self.top_book.write_row(&[
            recv_time_ms.to_string(),
            recv_seq.to_string(),
            epoch_id.to_string(),
            event_time_ms.to_string(),
            side.to_string(),
            rank.to_string(),
            price.to_string(),
            qty.to_string(),
        ])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write_trade_row(
        &mut self,
        recv_time_ms: i64,
        recv_seq: u64,
        event_time_ms: i64,
        trade_id: &str,
        price: &str,
        qty: &str,
        side: &str,
        is_buyer_maker: Option<bool>,
    ) -> Result<()> {
        self.trades.write_row(&[
            recv_time_ms.to_string(),
            recv_seq.to_string(),
            event_time_ms.to_string(),
            trade_id.to_string(),
            price.to_string(),
            qty.to_string(),
            side.to_string(),
            is_buyer_maker.map(|b| b.to_string()).unwrap_or_default(),
        ])
    }

    pub fn write_event(&mut self, event: &EventRecord) -> Result<()> {
        self.events.write_row(&[
            event.event_id.to_string(),
            event.recv_time_ms.to_string(),
            event.recv_seq.to_string(),
            event.run_id.clone(),
            event.kind.as_str().to_string(),
            event.epoch_id.to_string(),
            event.details_json.clone(),
        ])
    }

    pub fn write_gap(&mut self, gap: &GapRecord) -> Result<()> {
        self.gaps.write_row(&[
            gap.recv_time_ms.to_string(),
            gap.recv_seq.to_string(),
            gap.run_id.clone(),
            gap.epoch_id.to_string(),
            gap.event.clone(),
            gap.details.clone(),
        ])
    }

    pub fn write_depth_diff_raw(&mut self, recv_time_ms: i64, recv_seq: u64, raw: &str) -> Result<()> {
        if let Some(w) = self.depth_diffs_raw.as_mut() {
            let line = serde_json::json!({
                "recv_time_ms": recv_time_ms,
                "recv_seq": recv_seq,
                "raw": raw,
            })
            .to_string();
            w.write_line(&line)?;
        }
        Ok(())
    }

    pub fn write_trade_raw(&mut self, recv_time_ms: i64, recv_seq: u64, raw: &str) -> Result<()> {
        if let Some(w) = self.trades_raw.as_mut() {
            let line = serde_json::json!({
                "recv_time_ms": recv_time_ms,
                "recv_seq": recv_seq,
                "raw": raw,
            })
            .to_string();
            w.write_line(&line)?;
        }
        Ok(())
    }

    /// Writes a snapshot CSV+JSON pair (§4.6 "Snapshots"), immediately
    /// flushed since snapshots are infrequent and audit-critical.
    pub fn write_snapshot(
        &self,
        event_id: u64,
        tag: &str,
        rows: &[(&str, usize, &str, &str)],
        raw_json: &[u8],
    ) -> Result<()> {
        let csv_path = self
            .day_dir
            .join("snapshots")
            .join(format!("snapshot_{event_id}_{tag}.csv"));
        let json_path = self
            .day_dir
            .join("snapshots")
            .join(format!("snapshot_{event_id}_{tag}.json"));

        let mut writer = csv::Writer::from_path(&csv_path).map_err(RecorderError::Csv)?;
        writer
            .write_record(["side", "rank", "price", "qty"])
            .map_err(RecorderError::Csv)?;
        for (side, rank, price, qty) in rows {
            writer
                .write_record([*side, &rank.to_string(), price, qty])
                .map_err(RecorderError::Csv)?;
        }
        retry_disk_io(|| writer.flush()).map_err(|source| RecorderError::DiskIo {
            stream: WriterStream::Snapshot,
            source,
        })?;

        retry_disk_io(|| std::fs::write(&json_path, raw_json)).map_err(|source| {
            RecorderError::DiskIo {
                stream: WriterStream::Snapshot,
                source,
            }
        })?;
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        self.top_book.flush()?;
        self.trades.flush()?;
        self.events.flush()?;
        self.gaps.flush()?;
        if let Some(w) = self.depth_diffs_raw.as_mut() {
            w.flush()?;
        }
        if let Some(w) = self.trades_raw.as_mut() {
            w.flush()?;
        }
        Ok(())
    }

    /// Finalizes every gzip footer (§4.6 "gzip footer must be finalized on
    /// clean shutdown"). Consumes `self`; there is no reopening a fabric.
    pub fn close(self) -> Result<()> {
        self.top_book.finish()?;
        self.trades.finish()?;
        self.events.finish()?;
        self.gaps.finish()?;
        if let Some(w) = self.depth_diffs_raw {
            w.finish()?;
        }
        if let Some(w) = self.trades_raw {
            w.finish()?;
        }
        Ok(())
    }
}

/// Strips `/ - :` and whitespace from a trading pair to make it filesystem-safe
/// (§6 "Output directory", `SYMBOL_FS`).
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | ':') && !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_symbol_strips_separators() {
        assert_eq!(sanitize_symbol("BTC/USD"), "BTCUSD");
        assert_eq!(sanitize_symbol("btc-usd perp"), "btcusdperp");
    }

    #[test]
    fn open_creates_directory_tree_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let fabric = WriterFabric::open(
            dir.path(),
            "binance",
            "BTC/USDT",
            date,
            WriterConfig::default(),
        )
        .unwrap();

        assert!(fabric.day_dir().join("schema.json").exists());
        assert!(fabric.day_dir().ends_with("binance/BTCUSDT/20260728"));
        fabric.close().unwrap();
    }

    #[test]
    fn writes_rows_across_streams_and_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let mut fabric = WriterFabric::open(
            dir.path(),
            "kraken",
            "XBT/USD",
            date,
            WriterConfig::default(),
        )
        .unwrap();

        fabric
            .write_top_book_row(1, 1, 1, 1, "bid", 0, "100.00", "1.5")
            .unwrap();
        fabric
            .write_trade_row(2, 2, 2, "t1", "100.00", "0.5", "buy", Some(true))
            .unwrap();
        fabric.write_depth_diff_raw(3, 3, "{}").unwrap();
        fabric.flush_all().unwrap();
        fabric.close().unwrap();
    }
}

use std::time::Duration;

use clap::Parser;

use crate::error::{RecorderError, Result};
use crate::exchanges::Exchange;
use crate::transport::TransportConfig;
use crate::writer::WriterConfig;

/// The recorder's full configuration surface (§6 "External interfaces").
/// Environment-driven per the source system being modeled, with a CLI flag
/// for every field for free via `clap`'s `env` feature.
#[derive(Parser, Debug, Clone)]
#[command(name = "md-recorder", about = "Per-symbol crypto market-data recorder")]
pub struct RecorderConfig {
    #[arg(long, env = "SYMBOL")]
    pub symbol: String,

    #[arg(long, env = "EXCHANGE", default_value = "binance")]
    pub exchange: Exchange,

    #[arg(long, env = "DEPTH_LEVELS", default_value_t = 20)]
    pub depth_levels: usize,

    #[arg(long, env = "STORE_DEPTH_DIFFS", default_value_t = true)]
    pub store_depth_diffs: bool,

    #[arg(long, env = "WS_PING_INTERVAL_S", default_value_t = 20)]
    pub ws_ping_interval_s: u64,
    #[arg(long, env = "WS_PING_TIMEOUT_S", default_value_t = 10)]
    pub ws_ping_timeout_s: u64,
    #[arg(long, env = "WS_OPEN_TIMEOUT_S", default_value_t = 10)]
    pub ws_open_timeout_s: u64,
    #[arg(long, env = "WS_RECONNECT_BACKOFF_S", default_value_t = 1)]
    pub ws_reconnect_backoff_s: u64,
    #[arg(long, env = "WS_RECONNECT_BACKOFF_MAX_S", default_value_t = 30)]
    pub ws_reconnect_backoff_max_s: u64,
    #[arg(long, env = "WS_MAX_SESSION_S", default_value_t = 23 * 3600)]
    pub ws_max_session_s: u64,
    #[arg(long, env = "WS_NO_DATA_WARN_S", default_value_t = 60)]
    pub ws_no_data_warn_s: u64,

    #[arg(long, env = "WINDOW_TZ", default_value = "Europe/Berlin")]
    pub window_tz: String,
    #[arg(long, env = "WINDOW_START_HHMM", default_value = "0000")]
    pub window_start_hhmm: String,
    #[arg(long, env = "WINDOW_END_HHMM", default_value = "2359")]
    pub window_end_hhmm: String,
    #[arg(long, env = "WINDOW_END_DAY_OFFSET", default_value_t = 0)]
    pub window_end_day_offset: i64,

    #[arg(long, env = "HEARTBEAT_SEC", default_value_t = 30)]
    pub heartbeat_sec: u64,
    #[arg(long, env = "SYNC_WARN_AFTER_SEC", default_value_t = 30)]
    pub sync_warn_after_sec: u64,
    #[arg(long, env = "MAX_BUFFER_WARN", default_value_t = 2000)]
    pub max_buffer_warn: usize,

    #[arg(long, env = "ORDERBOOK_BUFFER_ROWS", default_value_t = 200)]
    pub orderbook_buffer_rows: usize,
    #[arg(long, env = "TRADES_BUFFER_ROWS", default_value_t = 50)]
    pub trades_buffer_rows: usize,
    #[arg(long, env = "BUFFER_FLUSH_INTERVAL_SEC", default_value_t = 5)]
    pub buffer_flush_interval_sec: u64,

    #[arg(long, env = "INSECURE_TLS", default_value_t = false)]
    pub insecure_tls: bool,

    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: String,
}

impl RecorderConfig {
    /// Parses configuration from environment variables and CLI flags,
    /// failing fast with `ConfigInvalid` rather than panicking (§10.3).
    pub fn from_env() -> Result<Self> {
        let config = Self::try_parse().map_err(|e| RecorderError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(RecorderError::ConfigInvalid("SYMBOL must not be empty".into()));
        }
        if self.depth_levels == 0 {
            return Err(RecorderError::ConfigInvalid(
                "DEPTH_LEVELS must be at least 1".into(),
            ));
        }
        if parse_hhmm(&self.window_start_hhmm).is_none() {
            return Err(RecorderError::ConfigInvalid(format!(
                "WINDOW_START_HHMM {:?} is not HHMM",
                self.window_start_hhmm
            )));
        }
        if parse_hhmm(&self.window_end_hhmm).is_none() {
            return Err(RecorderError::ConfigInvalid(format!(
                "WINDOW_END_HHMM {:?} is not HHMM",
                self.window_end_hhmm
            )));
        }
        self.window_tz
            .parse::<chrono_tz::Tz>()
            .map_err(|_| RecorderError::ConfigInvalid(format!("unknown WINDOW_TZ {:?}", self.window_tz)))?;
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ping_interval_s: self.ws_ping_interval_s,
            ping_timeout_s: self.ws_ping_timeout_s,
            open_timeout_s: self.ws_open_timeout_s,
            reconnect_backoff_s: self.ws_reconnect_backoff_s,
            reconnect_backoff_max_s: self.ws_reconnect_backoff_max_s,
            max_session_s: self.ws_max_session_s,
            no_data_warn_s: self.ws_no_data_warn_s,
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            orderbook_buffer_rows: self.orderbook_buffer_rows,
            trades_buffer_rows: self.trades_buffer_rows,
            flush_interval: Duration::from_secs(self.buffer_flush_interval_sec),
            ndjson_flush_bytes: 1 << 16,
            store_depth_diffs: self.store_depth_diffs,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_sec)
    }

    pub fn sync_warn_after(&self) -> Duration {
        Duration::from_secs(self.sync_warn_after_sec)
    }
}

/// Parses an `HHMM` string (e.g. `"0930"`) into `(hour, minute)`.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    if s.len() != 4 {
        return None;
    }
    let hour: u32 = s[0..2].parse().ok()?;
    let minute: u32 = s[2..4].parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hhmm_accepts_valid_and_rejects_invalid() {
        assert_eq!(parse_hhmm("0930"), Some((9, 30)));
        assert_eq!(parse_hhmm("2359"), Some((23, 59)));
        assert_eq!(parse_hhmm("2400"), None);
        assert_eq!(parse_hhmm("93"), None);
        assert_eq!(parse_hhmm("abcd"), None);
    }

    #[test]
    fn from_env_rejects_empty_symbol() {
        let config = RecorderConfig::try_parse_from([
            "md-recorder",
            "--symbol",
            "",
            "--exchange",
            "binance",
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_env_rejects_bad_window_tz() {
        let config = RecorderConfig::try_parse_from([
            "md-recorder",
            "--symbol",
            "BTCUSDT",
            "--window-tz",
            "Not/AZone",
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_required_args() {
        let config =
            RecorderConfig::try_parse_from(["md-recorder", "--symbol", "BTCUSDT"]).unwrap();
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.exchange, Exchange::Binance);
        assert_eq!(config.depth_levels, 20);
    }
}

use std::time::Duration;

use serde::Deserialize;

use crate::error::{RecorderError, Result};
use crate::exchanges::exchange_utils::level_from_json_pair;
use crate::model::Snapshot;
use crate::transport::full_jitter_backoff;

const SNAPSHOT_BASE_ENDPOINT: &str = "https://api.binance.com/api/v3/depth";

#[derive(Deserialize)]
struct SnapshotWire {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

/// REST snapshot source for Binance (C4, §4.5). Retries transient HTTP
/// failures with bounded exponential backoff; `insecure_tls` is a debug-only
/// escape hatch for TLS verification (§4.5, §6 `INSECURE_TLS`).
pub struct BinanceSnapshotSource {
    client: reqwest::Client,
    pair_upper: String,
    depth: usize,
    max_attempts: u32,
}

impl BinanceSnapshotSource {
    pub fn new(pair_upper: String, depth: usize, insecure_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            pair_upper,
            depth,
            max_attempts: 5,
        })
    }

    pub async fn fetch(&self) -> Result<Snapshot> {
        let url = format!(
            "{SNAPSHOT_BASE_ENDPOINT}?symbol={}&limit={}",
            self.pair_upper, self.depth
        );

        let mut attempt = 0u32;
        loop {
            match self.try_fetch(&url).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if attempt + 1 < self.max_attempts => {
                    let backoff = full_jitter_backoff(
                        attempt,
                        Duration::from_millis(500),
                        Duration::from_secs(30),
                    );
                    tracing::warn!(
                        error = %e,
                        attempt,
                        ?backoff,
                        "binance snapshot fetch failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<Snapshot> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecorderError::Snapshot(format!(
                "binance depth endpoint returned {status}: {body}"
            )));
        }

        let raw_bytes = response.bytes().await?.to_vec();
        let wire: SnapshotWire = serde_json::from_slice(&raw_bytes)?;

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

        Ok(Snapshot {
            bids,
            asks,
            last_update_id: wire.last_update_id,
            checksum: None,
            raw_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_well_formed() {
        let source = BinanceSnapshotSource::new("BTCUSDT".to_string(), 1000, false).unwrap();
        assert_eq!(source.pair_upper, "BTCUSDT");
        assert_eq!(source.depth, 1000);
    }
}

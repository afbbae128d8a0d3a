pub mod client;

use std::time::Duration;

/// The exhaustive WS transport configuration set (§4.2).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ping_interval_s: u64,
    pub ping_timeout_s: u64,
    pub open_timeout_s: u64,
    pub reconnect_backoff_s: u64,
    pub reconnect_backoff_max_s: u64,
    pub max_session_s: u64,
    pub no_data_warn_s: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ping_interval_s: 20,
            ping_timeout_s: 10,
            open_timeout_s: 10,
            reconnect_backoff_s: 1,
            reconnect_backoff_max_s: 30,
            max_session_s: 23 * 3600,
            no_data_warn_s: 60,
        }
    }
}

impl TransportConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_s)
    }
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_s)
    }
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_s)
    }
    pub fn reconnect_backoff_base(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_s)
    }
    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_max_s)
    }
    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_s)
    }
    pub fn no_data_warn(&self) -> Duration {
        Duration::from_secs(self.no_data_warn_s)
    }
}

/// Events a transport session surfaces to the orchestrator, beyond the raw
/// message bytes (§4.2, §4.7 heartbeat/warnings).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Message(tungstenite::Message),
    Closed,
    NoDataWarning,
}

/// A cooperative single shutdown signal (§5 "Cancellation"). Cloning shares
/// the same underlying flag; `cancel()` wakes every clone's `cancelled()`.
#[derive(Clone)]
pub struct CancelToken(tokio::sync::watch::Sender<bool>);

impl CancelToken {
    pub fn new() -> (Self, tokio::sync::watch::Receiver<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Self(tx), rx)
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Full-jitter exponential backoff (§4.2 "bounded exponential backoff
/// (full-jitter recommended)").
pub fn full_jitter_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base
        .as_secs_f64()
        .mul_add(2f64.powi(attempt as i32), 0.0)
        .min(max.as_secs_f64());
    let jittered = rand::Rng::gen_range(&mut rand::thread_rng(), 0.0..=exp);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_max() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        for attempt in 0..20 {
            let d = full_jitter_backoff(attempt, base, max);
            assert!(d <= max);
        }
    }
}

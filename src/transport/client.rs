use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tungstenite::Message;

use super::{full_jitter_backoff, CancelToken, TransportConfig, TransportEvent};
use crate::error::{RecorderError, Result};

/// Spawns a single-endpoint reconnecting WebSocket client (C2, §4.2).
///
/// On connect it sends `subscribe` (if given) and emits `TransportEvent::Open`.
/// Every reconnect attempt re-sends `subscribe`, since most exchange channels
/// require a fresh subscription per session. The caller is expected to treat
/// each `Open` as a signal that any in-flight sync state should restart from
/// a fresh snapshot (§4.2 "Every reconnect increments the resync epoch
/// downstream").
///
/// Backpressure: the channel send blocks the transport task when the
/// dispatch side is slow, which is required — market data must never be
/// dropped for buffer-full reasons (§5 "Backpressure").
pub fn spawn(
    url: String,
    subscribe: Vec<Message>,
    config: TransportConfig,
    buffer: usize,
    mut cancel_rx: tokio::sync::watch::Receiver<bool>,
) -> (Receiver<TransportEvent>, JoinHandle<Result<()>>) {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer);

    let handle = tokio::spawn(async move {
        let mut attempt: u32 = 0;

        loop {
            if *cancel_rx.borrow() {
                return Ok(());
            }

            match run_session(&url, subscribe.clone(), &config, &tx, &mut cancel_rx).await {
                Ok(()) => {
                    // Clean shutdown via cancellation.
                    return Ok(());
                }
                Err(_e) => {
                    if *cancel_rx.borrow() {
                        return Ok(());
                    }
                    let backoff = full_jitter_backoff(
                        attempt,
                        config.reconnect_backoff_base(),
                        config.reconnect_backoff_max(),
                    );
                    tracing::warn!(?backoff, attempt, "transport session ended, reconnecting");
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    });

    (rx, handle)
}

async fn run_session(
    url: &str,
    subscribe: Vec<Message>,
    config: &TransportConfig,
    tx: &Sender<TransportEvent>,
    cancel_rx: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let (mut stream, _) = tokio::time::timeout(config.open_timeout(), tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| RecorderError::Transport(tungstenite::Error::ConnectionClosed))??;

    tracing::info!(url, "ws connection established");
    tx.send(TransportEvent::Open)
        .await
        .map_err(|_| RecorderError::SendClosed)?;

    for sub in subscribe {
        stream.send(sub).await?;
    }

    let session_deadline = Instant::now() + config.max_session();
    let mut next_ping = Instant::now() + config.ping_interval();
    let mut pong_deadline: Option<Instant> = None;
    let mut last_data = Instant::now();
    let mut warned_no_data = false;

    loop {
        let no_data_check = Instant::now() + Duration::from_secs(1).min(config.no_data_warn());

        tokio::select! {
            biased;

            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    let _ = stream.close(None).await;
                    return Ok(());
                }
            }

            _ = tokio::time::sleep_until(session_deadline) => {
                tracing::info!("max_session_s elapsed, forcing reconnect");
                let _ = stream.close(None).await;
                return Err(RecorderError::Transport(tungstenite::Error::ConnectionClosed));
            }

            _ = tokio::time::sleep_until(next_ping), if pong_deadline.is_none() => {
                stream.send(Message::Ping(vec![])).await?;
                pong_deadline = Some(Instant::now() + config.ping_timeout());
            }

            _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))), if pong_deadline.is_some() => {
                tracing::warn!("ping timeout, reconnecting");
                return Err(RecorderError::Transport(tungstenite::Error::ConnectionClosed));
            }

            _ = tokio::time::sleep_until(no_data_check) => {
                if last_data.elapsed() >= config.no_data_warn() && !warned_no_data {
                    warned_no_data = true;
                    let _ = tx.send(TransportEvent::NoDataWarning).await;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(msg @ Message::Text(_))) | Some(Ok(msg @ Message::Binary(_))) => {
                        last_data = Instant::now();
                        warned_no_data = false;
                        tx.send(TransportEvent::Message(msg))
                            .await
                            .map_err(|_| RecorderError::SendClosed)?;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        stream.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                        next_ping = Instant::now() + config.ping_interval();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("ws connection closed");
                        let _ = tx.send(TransportEvent::Closed).await;
                        return Err(RecorderError::Transport(tungstenite::Error::ConnectionClosed));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(RecorderError::Transport(e)),
                }
            }
        }
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use tokio::sync::broadcast;
use tungstenite::Message;

use crate::config::{parse_hhmm, RecorderConfig};
use crate::error::{RecorderError, Result};
use crate::events::{EventIdAllocator, EventKind, EventRecord, GapRecord};
use crate::exchanges::binance::snapshot::BinanceSnapshotSource;
use crate::exchanges::{binance, bitfinex, kraken, Exchange};
use crate::model::{BookTopUpdate, Frame, RecorderUpdate};
use crate::order_book::OrderBook;
use crate::recv_seq::RecvSeqAllocator;
use crate::sync::{ChecksumEngine, ChecksumFlavor, SeqEngine, SyncEngine, SyncOutcome, SyncState};
use crate::transport::{self, CancelToken, TransportEvent};
use crate::writer::WriterFabric;

/// Creates the in-process broadcast channel a collaborator subscribes to
/// before calling [`run_with_updates`] (§1 "the core exposes a typed stream
/// of reconstructed book states and trades to those collaborators"). The
/// core itself never reads from the receiver side; it only ever holds the
/// sender, so a collaborator that never subscribes pays nothing beyond the
/// cost of one `send` call per book-top/trade that nobody receives.
pub fn new_update_channel(capacity: usize) -> (broadcast::Sender<RecorderUpdate>, broadcast::Receiver<RecorderUpdate>) {
    broadcast::channel(capacity)
}

/// Runs one full trading-window session end to end (C6, §4.7): waits for
/// the window to open, drives C2/C3/C1/C5 until the window closes, then
/// flushes and exits cleanly. Returns once the window has ended; the
/// binary entrypoint calls this in a loop for multi-day operation. Equivalent
/// to `run_with_updates(config, None)` for callers with no in-process
/// collaborator to publish to.
pub async fn run(config: RecorderConfig) -> Result<()> {
    run_with_updates(config, None).await
}

/// Same as [`run`], but additionally publishes every reconstructed book top
/// and trade print to `updates` as it is persisted, for an in-process
/// collaborator holding the matching receiver from [`new_update_channel`].
pub async fn run_with_updates(
    config: RecorderConfig,
    updates: Option<broadcast::Sender<RecorderUpdate>>,
) -> Result<()> {
    let (window_start, window_end) = next_window(&config)?;
    wait_until(window_start).await;

    let run_id = uuid::Uuid::new_v4().to_string();
    let recv_seq = RecvSeqAllocator::new();
    let event_ids = EventIdAllocator::new();

    let today = window_start.naive_local().date();
    let mut fabric = WriterFabric::open(
        Path::new(&config.data_dir),
        config.exchange.as_str(),
        &config.symbol,
        today,
        config.writer_config(),
    )?;

    emit_event(
        &mut fabric,
        &recv_seq,
        &event_ids,
        &run_id,
        EventKind::RunStart,
        0,
        serde_json::json!({ "symbol": config.symbol, "exchange": config.exchange.as_str() }),
    )?;
    emit_event(
        &mut fabric,
        &recv_seq,
        &event_ids,
        &run_id,
        EventKind::WindowStart,
        0,
        serde_json::json!({ "window_end": window_end.to_rfc3339() }),
    )?;

    let result = drive_session(&config, &run_id, &recv_seq, &event_ids, &mut fabric, window_end, updates.as_ref()).await;

    emit_event(
        &mut fabric,
        &recv_seq,
        &event_ids,
        &run_id,
        EventKind::WindowEnd,
        0,
        serde_json::json!({}),
    )?;
    emit_event(
        &mut fabric,
        &recv_seq,
        &event_ids,
        &run_id,
        EventKind::RunEnd,
        0,
        serde_json::json!({ "ok": result.is_ok() }),
    )?;
    fabric.flush_all()?;
    fabric.close()?;
    result
}

/// The session body: owns the book, the sync engine, and the (possibly
/// several times respawned) transport connection, until the window ends.
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    config: &RecorderConfig,
    run_id: &str,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    fabric: &mut WriterFabric,
    window_end: DateTime<chrono_tz::Tz>,
    updates: Option<&broadcast::Sender<RecorderUpdate>>,
) -> Result<()> {
    let mut book = OrderBook::new();
    let mut sync_engine = make_sync_engine(config);
    let mut state = SyncState::Connecting;
    // Spans a full reconnect: a resync that is still open (its
    // `resync_start` has been emitted but no matching `resync_done` yet)
    // stays open across `mark_connecting()`, since the observed transition
    // there is `Resyncing -> WaitingSnapshot`, not `Resyncing -> Synced`
    // (§8 I5).
    let mut resync_open = false;

    loop {
        let (url, subs) = build_subscriptions(config);
        let (cancel, cancel_rx) = CancelToken::new();
        let (mut rx, handle) = transport::client::spawn(
            url,
            subs,
            config.transport_config(),
            4096,
            cancel_rx,
        );
        let prev_state = state;
        sync_engine.mark_connecting();
        state = SyncState::WaitingSnapshot;
        note_state_transition(
            fabric,
            recv_seq,
            event_ids,
            run_id,
            book.epoch_id(),
            &mut resync_open,
            prev_state,
            state,
        )?;

        let session_outcome = run_until_resync_or_window_end(
            config,
            run_id,
            recv_seq,
            event_ids,
            fabric,
            &mut book,
            sync_engine.as_mut(),
            &mut state,
            &mut resync_open,
            &mut rx,
            window_end,
            updates,
        )
        .await;

        cancel.cancel();
        let _ = handle.await;

        match session_outcome? {
            SessionOutcome::WindowEnded => return Ok(()),
            SessionOutcome::NeedsFullResync => continue,
        }
    }
}

enum SessionOutcome {
    WindowEnded,
    NeedsFullResync,
}

#[allow(clippy::too_many_arguments)]
async fn run_until_resync_or_window_end(
    config: &RecorderConfig,
    run_id: &str,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    fabric: &mut WriterFabric,
    book: &mut OrderBook,
    sync_engine: &mut (dyn SyncEngine + Send),
    state: &mut SyncState,
    resync_open: &mut bool,
    rx: &mut tokio::sync::mpsc::Receiver<TransportEvent>,
    window_end: DateTime<chrono_tz::Tz>,
    updates: Option<&broadcast::Sender<RecorderUpdate>>,
) -> Result<SessionOutcome> {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval());
    let window_deadline = tokio::time::Instant::now()
        + duration_until(window_end).unwrap_or(Duration::from_secs(0));

    let session_start = tokio::time::Instant::now();
    let mut state_since = session_start;
    let mut last_message_at = session_start;
    let mut sync_warned = false;

    loop {
        tokio::select! {
            biased;

            _ = tokio::time::sleep_until(window_deadline) => {
                return Ok(SessionOutcome::WindowEnded);
            }

            _ = heartbeat.tick() => {
                let buffered_rows = sync_engine.buffered_len();
                let since_last_message_ms = last_message_at.elapsed().as_millis();
                tracing::info!(
                    phase = ?state,
                    book_valid = book.is_valid(),
                    buffered_rows,
                    since_last_message_ms,
                    "heartbeat",
                );

                // §4.7 "sync_warn_after_s without reaching SYNCED after snapshot".
                if *state != SyncState::Synced
                    && state_since.elapsed() >= config.sync_warn_after()
                    && !sync_warned
                {
                    sync_warned = true;
                    tracing::warn!(phase = ?state, "sync_warn_after_s elapsed without reaching SYNCED");
                    emit_event(fabric, recv_seq, event_ids, run_id, EventKind::Warning, book.epoch_id(), serde_json::json!({ "reason": "sync_stalled", "phase": format!("{state:?}") }))?;
                }

                // §4.7 "max_buffer_warn rows in the pre-sync buffer" — a
                // diagnostic only; the buffer itself is never truncated (§9).
                if buffered_rows >= config.max_buffer_warn {
                    tracing::warn!(buffered_rows, "pre-sync buffer exceeds MAX_BUFFER_WARN");
                    emit_event(fabric, recv_seq, event_ids, run_id, EventKind::Warning, book.epoch_id(), serde_json::json!({ "reason": "max_buffer_warn", "buffered_rows": buffered_rows }))?;
                }
            }

            event = rx.recv() => {
                let Some(event) = event else {
                    return Ok(SessionOutcome::NeedsFullResync);
                };
                match event {
                    TransportEvent::Open => {
                        tracing::info!("ws open");
                        last_message_at = tokio::time::Instant::now();
                        emit_event(fabric, recv_seq, event_ids, run_id, EventKind::WsOpen, book.epoch_id(), serde_json::json!({}))?;
                        if config.exchange == Exchange::Binance {
                            fetch_and_apply_binance_snapshot(config, fabric, recv_seq, event_ids, run_id, book, sync_engine, state, resync_open).await?;
                            state_since = tokio::time::Instant::now();
                            sync_warned = false;
                        }
                    }
                    TransportEvent::Closed => {
                        emit_event(fabric, recv_seq, event_ids, run_id, EventKind::WsClose, book.epoch_id(), serde_json::json!({}))?;
                        return Ok(SessionOutcome::NeedsFullResync);
                    }
                    TransportEvent::NoDataWarning => {
                        emit_event(fabric, recv_seq, event_ids, run_id, EventKind::Warning, book.epoch_id(), serde_json::json!({ "reason": "no_data" }))?;
                    }
                    TransportEvent::Message(msg) => {
                        last_message_at = tokio::time::Instant::now();
                        if let Message::Text(text) = msg {
                            let prev_state = *state;
                            let needs_resync = handle_text_frame(
                                config, run_id, recv_seq, event_ids, fabric, book, sync_engine, state, resync_open, &text, updates,
                            )?;
                            if *state != prev_state {
                                state_since = tokio::time::Instant::now();
                                if *state == SyncState::Synced {
                                    sync_warned = false;
                                }
                            }
                            if needs_resync {
                                if config.exchange == Exchange::Binance {
                                    fetch_and_apply_binance_snapshot(config, fabric, recv_seq, event_ids, run_id, book, sync_engine, state, resync_open).await?;
                                    state_since = tokio::time::Instant::now();
                                    sync_warned = false;
                                } else {
                                    return Ok(SessionOutcome::NeedsFullResync);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_text_frame(
    config: &RecorderConfig,
    run_id: &str,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    fabric: &mut WriterFabric,
    book: &mut OrderBook,
    sync_engine: &mut (dyn SyncEngine + Send),
    state: &mut SyncState,
    resync_open: &mut bool,
    text: &str,
    updates: Option<&broadcast::Sender<RecorderUpdate>>,
) -> Result<bool> {
    // A malformed frame is logged and dropped, never fatal and never a
    // resync trigger (§7 `DecodeError`) — one bad message must not poison
    // an otherwise-healthy session.
    let frames = match parse_frames(config.exchange, text) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed frame");
            return Ok(false);
        }
    };
    let mut needs_resync = false;

    for frame in frames {
        let recv_time_ms = Utc::now().timestamp_millis();
        let seq = recv_seq.next();

        match frame {
            Frame::Snapshot(snapshot) => {
                emit_event(fabric, recv_seq, event_ids, run_id, EventKind::SnapshotStart, book.epoch_id(), serde_json::json!({}))?;
                let prev_state = *state;
                let outcome = sync_engine.on_snapshot(book, snapshot)?;
                *state = sync_engine.state();
                emit_event(fabric, recv_seq, event_ids, run_id, EventKind::SnapshotDone, book.epoch_id(), serde_json::json!({ "outcome": format!("{outcome:?}") }))?;
                note_state_transition(fabric, recv_seq, event_ids, run_id, book.epoch_id(), resync_open, prev_state, *state)?;
                if let SyncOutcome::CrossedBook { best_bid, best_ask } = &outcome {
                    needs_resync |= apply_sync_outcome(
                        fabric,
                        recv_seq,
                        event_ids,
                        run_id,
                        book,
                        &SyncOutcome::CrossedBook {
                            best_bid: best_bid.clone(),
                            best_ask: best_ask.clone(),
                        },
                        recv_time_ms,
                        seq,
                    )?;
                } else {
                    persist_top_book(fabric, book, config.depth_levels, recv_time_ms, seq, updates)?;
                }
            }
            Frame::Depth(diff) => {
                let raw = diff.raw.clone();
                let prev_state = *state;
                let outcome = sync_engine.on_diff(book, diff)?;
                *state = sync_engine.state();
                fabric.write_depth_diff_raw(recv_time_ms, seq, &raw)?;
                needs_resync |= apply_sync_outcome(fabric, recv_seq, event_ids, run_id, book, &outcome, recv_time_ms, seq)?;
                note_state_transition(fabric, recv_seq, event_ids, run_id, book.epoch_id(), resync_open, prev_state, *state)?;
                if matches!(outcome, SyncOutcome::Applied) {
                    persist_top_book(fabric, book, config.depth_levels, recv_time_ms, seq, updates)?;
                }
            }
            Frame::Trade(trade) => {
                fabric.write_trade_row(
                    recv_time_ms,
                    seq,
                    trade.event_time_ms,
                    &trade.trade_id,
                    &trade.price.to_string(),
                    &trade.qty.to_string(),
                    trade.side.as_str(),
                    trade.is_buyer_maker,
                )?;
                fabric.write_trade_raw(recv_time_ms, seq, &trade.raw)?;
                if let Some(tx) = updates {
                    let _ = tx.send(RecorderUpdate::Trade {
                        recv_time_ms,
                        recv_seq: seq,
                        trade,
                    });
                }
            }
            Frame::Checksum(received) => {
                let prev_state = *state;
                let outcome = sync_engine.on_checksum_frame(book, received)?;
                *state = sync_engine.state();
                needs_resync |= apply_sync_outcome(fabric, recv_seq, event_ids, run_id, book, &outcome, recv_time_ms, seq)?;
                note_state_transition(fabric, recv_seq, event_ids, run_id, book.epoch_id(), resync_open, prev_state, *state)?;
            }
            Frame::Heartbeat | Frame::Unknown(_) => {}
        }
    }

    Ok(needs_resync)
}

fn apply_sync_outcome(
    fabric: &mut WriterFabric,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    run_id: &str,
    book: &OrderBook,
    outcome: &SyncOutcome,
    recv_time_ms: i64,
    seq: u64,
) -> Result<bool> {
    match outcome {
        SyncOutcome::Gap { expected, got } => {
            fabric.write_gap(&GapRecord {
                recv_time_ms,
                recv_seq: seq,
                run_id: run_id.to_string(),
                epoch_id: book.epoch_id(),
                event: "gap".to_string(),
                details: format!("expected {expected}, got {got}"),
            })?;
            emit_event(fabric, recv_seq, event_ids, run_id, EventKind::Gap, book.epoch_id(), serde_json::json!({ "expected": expected, "got": got }))?;
            Ok(true)
        }
        SyncOutcome::ChecksumMismatch { local, received } => {
            fabric.write_gap(&GapRecord {
                recv_time_ms,
                recv_seq: seq,
                run_id: run_id.to_string(),
                epoch_id: book.epoch_id(),
                event: "checksum_mismatch".to_string(),
                details: format!("local {local:08x} != received {received:08x}"),
            })?;
            emit_event(fabric, recv_seq, event_ids, run_id, EventKind::ChecksumMismatch, book.epoch_id(), serde_json::json!({ "local": local, "received": received }))?;
            Ok(true)
        }
        SyncOutcome::StaleSnapshot => {
            // Same remedy as a gap: discard and re-fetch immediately (§9
            // stale-snapshot policy) rather than leave the engine buffering
            // forever.
            emit_event(fabric, recv_seq, event_ids, run_id, EventKind::StaleSnapshot, book.epoch_id(), serde_json::json!({}))?;
            Ok(true)
        }
        SyncOutcome::CrossedBook { best_bid, best_ask } => {
            fabric.write_gap(&GapRecord {
                recv_time_ms,
                recv_seq: seq,
                run_id: run_id.to_string(),
                epoch_id: book.epoch_id(),
                event: "crossed_book".to_string(),
                details: format!("best_bid {best_bid} >= best_ask {best_ask}"),
            })?;
            emit_event(fabric, recv_seq, event_ids, run_id, EventKind::Gap, book.epoch_id(), serde_json::json!({ "reason": "crossed_book", "best_bid": best_bid, "best_ask": best_ask }))?;
            Ok(true)
        }
        SyncOutcome::Applied | SyncOutcome::Buffered | SyncOutcome::Duplicate => Ok(false),
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_and_apply_binance_snapshot(
    config: &RecorderConfig,
    fabric: &mut WriterFabric,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    run_id: &str,
    book: &mut OrderBook,
    sync_engine: &mut (dyn SyncEngine + Send),
    state: &mut SyncState,
    resync_open: &mut bool,
) -> Result<()> {
    // A snapshot that doesn't bridge the pre-sync buffer is stale and gets
    // discarded by the engine; re-fetch immediately rather than leaving the
    // session buffering diffs against a snapshot that never arrived (§9
    // stale-snapshot policy).
    loop {
        emit_event(fabric, recv_seq, event_ids, run_id, EventKind::SnapshotStart, book.epoch_id(), serde_json::json!({}))?;
        let source = BinanceSnapshotSource::new(
            config.symbol.to_ascii_uppercase(),
            config.depth_levels.max(1000),
            config.insecure_tls,
        )?;
        let snapshot = source.fetch().await?;
        let event_id = event_ids.next();
        let raw_json = snapshot.raw_bytes.clone();
        let prev_state = *state;
        let outcome = sync_engine.on_snapshot(book, snapshot)?;
        *state = sync_engine.state();
        emit_event(
            fabric,
            recv_seq,
            event_ids,
            run_id,
            EventKind::SnapshotDone,
            book.epoch_id(),
            serde_json::json!({ "outcome": format!("{outcome:?}") }),
        )?;
        note_state_transition(fabric, recv_seq, event_ids, run_id, book.epoch_id(), resync_open, prev_state, *state)?;
        let rows: Vec<(&str, usize, String, String)> = {
            let (bids, asks) = book.top_n(config.depth_levels);
            bids.iter()
                .enumerate()
                .map(|(i, (_, l))| ("bid", i, l.raw_price.clone(), l.raw_qty.clone()))
                .chain(
                    asks.iter()
                        .enumerate()
                        .map(|(i, (_, l))| ("ask", i, l.raw_price.clone(), l.raw_qty.clone())),
                )
                .collect()
        };
        let row_refs: Vec<(&str, usize, &str, &str)> = rows
            .iter()
            .map(|(side, rank, price, qty)| (*side, *rank, price.as_str(), qty.as_str()))
            .collect();
        fabric.write_snapshot(event_id, "binance", &row_refs, &raw_json)?;

        if matches!(outcome, SyncOutcome::StaleSnapshot) {
            tracing::warn!("binance snapshot did not bridge the pre-sync buffer, re-fetching");
            emit_event(fabric, recv_seq, event_ids, run_id, EventKind::StaleSnapshot, book.epoch_id(), serde_json::json!({}))?;
            continue;
        }
        return Ok(());
    }
}

fn persist_top_book(
    fabric: &mut WriterFabric,
    book: &OrderBook,
    depth: usize,
    recv_time_ms: i64,
    seq: u64,
    updates: Option<&broadcast::Sender<RecorderUpdate>>,
) -> Result<()> {
    let (bids, asks) = book.top_n(depth);
    for (rank, (_, level)) in bids.iter().enumerate() {
        fabric.write_top_book_row(recv_time_ms, seq, book.epoch_id(), recv_time_ms, "bid", rank, &level.raw_price, &level.raw_qty)?;
    }
    for (rank, (_, level)) in asks.iter().enumerate() {
        fabric.write_top_book_row(recv_time_ms, seq, book.epoch_id(), recv_time_ms, "ask", rank, &level.raw_price, &level.raw_qty)?;
    }
    if let Some(tx) = updates {
        let _ = tx.send(RecorderUpdate::BookTop(BookTopUpdate {
            recv_time_ms,
            recv_seq: seq,
            epoch_id: book.epoch_id(),
            bids: bids.iter().map(|(price, l)| (*price, l.qty)).collect(),
            asks: asks.iter().map(|(price, l)| (*price, l.qty)).collect(),
        }));
    }
    Ok(())
}

fn make_sync_engine(config: &RecorderConfig) -> Box<dyn SyncEngine + Send> {
    match config.exchange {
        Exchange::Binance => Box::new(SeqEngine::new(config.depth_levels.max(1000))),
        Exchange::Kraken => Box::new(ChecksumEngine::new(ChecksumFlavor::Kraken, config.depth_levels)),
        Exchange::Bitfinex => Box::new(ChecksumEngine::new(ChecksumFlavor::Bitfinex, config.depth_levels)),
    }
}

fn build_subscriptions(config: &RecorderConfig) -> (String, Vec<Message>) {
    match config.exchange {
        Exchange::Binance => {
            let pair = config.symbol.to_ascii_lowercase();
            (binance::ws_url(&pair), vec![])
        }
        Exchange::Kraken => {
            let pair = config.symbol.clone();
            let book_sub = kraken::subscribe_message(&[pair.clone()], config.depth_levels);
            let trade_sub = kraken::trade_subscribe_message(&[pair]);
            (
                kraken::WS_URL.to_string(),
                vec![Message::Text(book_sub), Message::Text(trade_sub)],
            )
        }
        Exchange::Bitfinex => {
            let symbol = config.symbol.clone();
            let book_sub = bitfinex::book_subscribe_message(&symbol, config.depth_levels);
            let trade_sub = bitfinex::trades_subscribe_message(&symbol);
            (
                bitfinex::WS_URL.to_string(),
                vec![Message::Text(book_sub), Message::Text(trade_sub)],
            )
        }
    }
}

fn parse_frames(exchange: Exchange, text: &str) -> Result<Vec<Frame>> {
    match exchange {
        Exchange::Binance => Ok(vec![binance::parse_frame(text)?]),
        Exchange::Kraken => kraken::parse_frame(text),
        Exchange::Bitfinex => bitfinex::parse_frame(text),
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_event(
    fabric: &mut WriterFabric,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    run_id: &str,
    kind: EventKind,
    epoch_id: u64,
    details: serde_json::Value,
) -> Result<()> {
    let record = EventRecord {
        event_id: event_ids.next(),
        recv_time_ms: Utc::now().timestamp_millis(),
        recv_seq: recv_seq.next(),
        run_id: run_id.to_string(),
        kind,
        epoch_id,
        details_json: details.to_string(),
    };
    tracing::info!(kind = kind.as_str(), epoch_id, "event");
    fabric.write_event(&record)
}

/// Emits `state_change` for every sync-state transition (§4.7 "Every
/// transition emits a `state_change` event"), plus the matching
/// `resync_start`/`resync_done` pair around any excursion through
/// `Resyncing` (§8 I5: "every resync_start is followed by exactly one
/// resync_done or one run_end").
///
/// `resync_open` tracks this across transport reconnects: a resync that
/// forces a full reconnect surfaces as `Resyncing -> WaitingSnapshot`, not
/// `Resyncing -> Synced`, so the matching `resync_done` can't be found by
/// comparing `prev`/`next` alone — it has to watch whether a resync is
/// still open regardless of what happened in between.
#[allow(clippy::too_many_arguments)]
fn note_state_transition(
    fabric: &mut WriterFabric,
    recv_seq: &Arc<RecvSeqAllocator>,
    event_ids: &EventIdAllocator,
    run_id: &str,
    epoch_id: u64,
    resync_open: &mut bool,
    prev: SyncState,
    next: SyncState,
) -> Result<()> {
    if prev == next {
        return Ok(());
    }
    emit_event(
        fabric,
        recv_seq,
        event_ids,
        run_id,
        EventKind::StateChange,
        epoch_id,
        serde_json::json!({ "from": format!("{prev:?}"), "to": format!("{next:?}") }),
    )?;
    if next == SyncState::Resyncing {
        if !*resync_open {
            *resync_open = true;
            emit_event(fabric, recv_seq, event_ids, run_id, EventKind::ResyncStart, epoch_id, serde_json::json!({}))?;
        }
    } else if next == SyncState::Synced && *resync_open {
        *resync_open = false;
        emit_event(fabric, recv_seq, event_ids, run_id, EventKind::ResyncDone, epoch_id, serde_json::json!({}))?;
    }
    Ok(())
}

/// Computes the next `[start, end)` trading window, in the configured
/// timezone, rolling forward a day if today's window has already closed
/// (§4.7).
fn next_window(config: &RecorderConfig) -> Result<(DateTime<chrono_tz::Tz>, DateTime<chrono_tz::Tz>)> {
    let tz: chrono_tz::Tz = config
        .window_tz
        .parse()
        .map_err(|_| RecorderError::ConfigInvalid(format!("unknown WINDOW_TZ {:?}", config.window_tz)))?;
    let (start_h, start_m) = parse_hhmm(&config.window_start_hhmm)
        .ok_or_else(|| RecorderError::ConfigInvalid("bad WINDOW_START_HHMM".into()))?;
    let (end_h, end_m) = parse_hhmm(&config.window_end_hhmm)
        .ok_or_else(|| RecorderError::ConfigInvalid("bad WINDOW_END_HHMM".into()))?;

    let now = Utc::now().with_timezone(&tz);
    let mut day = now.date_naive();

    loop {
        let start_time = NaiveTime::from_hms_opt(start_h, start_m, 0).unwrap();
        let end_day = day + Days::new(config.window_end_day_offset.max(0) as u64);
        let end_time = NaiveTime::from_hms_opt(end_h, end_m, 0).unwrap();

        let start_dt = tz
            .from_local_datetime(&day.and_time(start_time))
            .single()
            .ok_or_else(|| RecorderError::ConfigInvalid("ambiguous WINDOW_START_HHMM".into()))?;
        let end_dt = tz
            .from_local_datetime(&end_day.and_time(end_time))
            .single()
            .ok_or_else(|| RecorderError::ConfigInvalid("ambiguous WINDOW_END_HHMM".into()))?;

        if now < end_dt {
            return Ok((start_dt, end_dt));
        }
        day += Days::new(1);
    }
}

async fn wait_until(deadline: DateTime<chrono_tz::Tz>) {
    if let Some(d) = duration_until(deadline) {
        tokio::time::sleep(d).await;
    }
}

fn duration_until(deadline: DateTime<chrono_tz::Tz>) -> Option<Duration> {
    let now = Utc::now().with_timezone(&deadline.timezone());
    let delta = deadline.signed_duration_since(now);
    delta.to_std().ok()
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use chrono::NaiveDate;

    use super::*;
    use crate::writer::WriterConfig;

    fn open_fabric() -> (tempfile::TempDir, WriterFabric) {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let fabric = WriterFabric::open(dir.path(), "binance", "BTCUSDT", date, WriterConfig::default()).unwrap();
        (dir, fabric)
    }

    fn read_event_kinds(dir: &tempfile::TempDir) -> Vec<String> {
        let path = dir
            .path()
            .join("binance")
            .join("BTCUSDT")
            .join("20260728")
            .join("events_BTCUSDT_20260728.csv.gz");
        let bytes = std::fs::read(path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        reader
            .records()
            .map(|r| r.unwrap().get(4).unwrap().to_string())
            .collect()
    }

    /// A resync that forces a full transport reconnect observes
    /// `Resyncing -> WaitingSnapshot`, not `Resyncing -> Synced`, across the
    /// reconnect boundary. `resync_open` must still close exactly once when
    /// the session eventually reaches `Synced`, not drop the close or emit
    /// it twice.
    #[test]
    fn resync_done_is_emitted_across_a_reconnect_boundary() {
        let (dir, mut fabric) = open_fabric();
        let recv_seq = RecvSeqAllocator::new();
        let event_ids = EventIdAllocator::new();
        let mut resync_open = false;

        note_state_transition(&mut fabric, &recv_seq, &event_ids, "run", 0, &mut resync_open, SyncState::Synced, SyncState::Resyncing).unwrap();
        assert!(resync_open);
        note_state_transition(&mut fabric, &recv_seq, &event_ids, "run", 0, &mut resync_open, SyncState::Resyncing, SyncState::WaitingSnapshot).unwrap();
        assert!(resync_open, "resync must stay open across the reconnect's WaitingSnapshot hop");
        note_state_transition(&mut fabric, &recv_seq, &event_ids, "run", 0, &mut resync_open, SyncState::WaitingSnapshot, SyncState::Synced).unwrap();
        assert!(!resync_open);

        fabric.flush_all().unwrap();
        fabric.close().unwrap();

        let kinds = read_event_kinds(&dir);
        assert_eq!(kinds.iter().filter(|k| *k == "resync_start").count(), 1);
        assert_eq!(kinds.iter().filter(|k| *k == "resync_done").count(), 1);
    }

    #[test]
    fn resync_open_does_not_reopen_mid_resync() {
        let (dir, mut fabric) = open_fabric();
        let recv_seq = RecvSeqAllocator::new();
        let event_ids = EventIdAllocator::new();
        let mut resync_open = false;

        note_state_transition(&mut fabric, &recv_seq, &event_ids, "run", 0, &mut resync_open, SyncState::Synced, SyncState::Resyncing).unwrap();
        // A second excursion into `Resyncing` (e.g. another checksum
        // mismatch before the first resync closes) must not emit a second
        // `resync_start`.
        note_state_transition(&mut fabric, &recv_seq, &event_ids, "run", 0, &mut resync_open, SyncState::WaitingSnapshot, SyncState::Resyncing).unwrap();

        fabric.flush_all().unwrap();
        fabric.close().unwrap();

        let kinds = read_event_kinds(&dir);
        assert_eq!(kinds.iter().filter(|k| *k == "resync_start").count(), 1);
    }

    #[test]
    fn apply_sync_outcome_requests_resync_on_stale_snapshot() {
        let (_dir, mut fabric) = open_fabric();
        let recv_seq = RecvSeqAllocator::new();
        let event_ids = EventIdAllocator::new();
        let book = OrderBook::new();

        let needs_resync = apply_sync_outcome(
            &mut fabric,
            &recv_seq,
            &event_ids,
            "run",
            &book,
            &SyncOutcome::StaleSnapshot,
            0,
            0,
        )
        .unwrap();
        assert!(needs_resync, "a stale snapshot must trigger an immediate re-fetch, same as a gap");
    }

    #[test]
    fn persist_top_book_publishes_to_subscribed_collaborator() {
        let (_dir, mut fabric) = open_fabric();
        let mut book = OrderBook::new();
        book.replace(
            vec![(rust_decimal::Decimal::from(100), rust_decimal::Decimal::from(1), "100".into(), "1".into())],
            vec![(rust_decimal::Decimal::from(101), rust_decimal::Decimal::from(1), "101".into(), "1".into())],
            None,
        );

        let (tx, mut rx) = new_update_channel(16);
        persist_top_book(&mut fabric, &book, 10, 1_000, 1, Some(&tx)).unwrap();

        match rx.try_recv().unwrap() {
            RecorderUpdate::BookTop(top) => {
                assert_eq!(top.recv_seq, 1);
                assert_eq!(top.epoch_id, book.epoch_id());
                assert_eq!(top.bids.len(), 1);
                assert_eq!(top.asks.len(), 1);
            }
            other => panic!("expected BookTop, got {other:?}"),
        }
    }

    #[test]
    fn persist_top_book_is_a_no_op_without_a_subscriber() {
        let (_dir, mut fabric) = open_fabric();
        let book = OrderBook::new();
        persist_top_book(&mut fabric, &book, 10, 1_000, 1, None).unwrap();
    }
}

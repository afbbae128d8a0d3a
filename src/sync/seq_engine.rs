use std::collections::VecDeque;

use crate::error::Result;
use crate::model::{DiffMessage, Snapshot};
use crate::order_book::book_side::Side;
use crate::order_book::OrderBook;

use super::{SyncEngine, SyncOutcome, SyncState};

/// Sequence-id bridging sync engine for Binance-style depth streams (§4.3).
///
/// Before a snapshot arrives, inbound diffs are buffered. Once the snapshot
/// lands, buffered diffs older than the snapshot are dropped, and the first
/// remaining diff must bridge the snapshot (`U <= lastUpdateId+1 <= u`); if
/// it does not, the snapshot is stale and the caller must re-fetch one
/// (§4.3 step 4, Open Question: stale snapshot policy). After the bridge,
/// every subsequent diff's `U` must equal the previous diff's `u + 1`, or a
/// gap has been detected and resync is required (§4.3 step 5).
pub struct SeqEngine {
    state: SyncState,
    buffer: VecDeque<DiffMessage>,
    depth: usize,
}

impl SeqEngine {
    pub fn new(depth: usize) -> Self {
        Self {
            state: SyncState::Connecting,
            buffer: VecDeque::new(),
            depth,
        }
    }

    /// Applies one diff and checks the crossed-book invariant. A crossed
    /// book is reported as `SyncOutcome::CrossedBook` rather than an `Err`,
    /// since it is handled by resyncing, not by aborting the run (§7).
    fn apply_diff(&mut self, book: &mut OrderBook, diff: DiffMessage) -> Result<SyncOutcome> {
        book.apply_side(
            Side::Bid,
            diff.bids.into_iter().map(|l| l.into_tuple()),
        );
        book.apply_side(
            Side::Ask,
            diff.asks.into_iter().map(|l| l.into_tuple()),
        );
        book.trim_to_depth(self.depth);
        if let Err(crate::error::RecorderError::CrossedBook { best_bid, best_ask }) =
            book.validate_crossed()
        {
            self.state = SyncState::Resyncing;
            self.buffer.clear();
            return Ok(SyncOutcome::CrossedBook { best_bid, best_ask });
        }
        book.set_last_applied_u(diff.last_update_id);
        Ok(SyncOutcome::Applied)
    }

    /// Scans the whole buffer — not just its front — for the first diff
    /// bridging `last_update_id` (§4.3 step 2: "find the first diff with
    /// `U ≤ L+1 ≤ u`"). Three outcomes: the buffer is empty, nothing
    /// arrived while the snapshot was in flight, so there's nothing to
    /// bridge or discard — the snapshot itself is the synced state and the
    /// next live diff is checked for contiguity the normal way; a bridge is
    /// found, so it and everything contiguous after it is applied; or the
    /// buffer is nonempty and nothing bridges, meaning a real hole sits
    /// between `L+1` and wherever the buffered data starts — genuinely
    /// stale, and the snapshot must be re-fetched.
    fn try_bridge(&mut self, book: &mut OrderBook, last_update_id: u64) -> Result<SyncOutcome> {
        // Diffs fully covered by the snapshot are duplicates; discard them
        // from anywhere in the buffer, not only the front (§4.3 step 2).
        self.buffer.retain(|d| d.last_update_id > last_update_id);

        if self.buffer.is_empty() {
            self.state = SyncState::Synced;
            return Ok(SyncOutcome::Applied);
        }

        let bridge_idx = self.buffer.iter().position(|d| {
            d.first_update_id <= last_update_id + 1 && last_update_id + 1 <= d.last_update_id
        });

        let Some(idx) = bridge_idx else {
            // Nonempty but nothing bridges: either the oldest entry's `U`
            // already starts past `L+1`, or a permanent hole straddles
            // `L+1` — either way no future diff can close the gap without
            // a fresh snapshot.
            self.buffer.clear();
            self.state = SyncState::Syncing;
            return Ok(SyncOutcome::StaleSnapshot);
        };

        // Diffs before the bridge are older than the snapshot; drop them.
        for _ in 0..idx {
            self.buffer.pop_front();
        }

        // Apply the bridge itself unconditionally (its `U` only needs to
        // cover `last_update_id + 1`, not equal `prev_u + 1`), then every
        // diff after it must satisfy the same `U == prev_u + 1` contiguity
        // the steady-state path enforces — a gap here is just as real as
        // one discovered after `SYNCED` (§4.3 step 3, I2).
        let bridge = self.buffer.pop_front().unwrap();
        let outcome = self.apply_diff(book, bridge)?;
        if matches!(outcome, SyncOutcome::CrossedBook { .. }) {
            return Ok(outcome);
        }

        while let Some(front) = self.buffer.front() {
            let expected = book.last_applied_u().map(|u| u + 1).unwrap_or(front.first_update_id);
            if front.first_update_id != expected {
                let got = front.first_update_id;
                let gapped = self.buffer.pop_front().unwrap();
                self.state = SyncState::Resyncing;
                self.buffer.clear();
                self.buffer.push_back(gapped);
                return Ok(SyncOutcome::Gap { expected, got });
            }
            let diff = self.buffer.pop_front().unwrap();
            let outcome = self.apply_diff(book, diff)?;
            if matches!(outcome, SyncOutcome::CrossedBook { .. }) {
                return Ok(outcome);
            }
        }
        self.state = SyncState::Synced;
        Ok(SyncOutcome::Applied)
    }
}

impl SyncEngine for SeqEngine {
    fn state(&self) -> SyncState {
        self.state
    }

    fn mark_connecting(&mut self) {
        self.state = SyncState::WaitingSnapshot;
        self.buffer.clear();
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn on_snapshot(&mut self, book: &mut OrderBook, snapshot: Snapshot) -> Result<SyncOutcome> {
        let last_update_id = snapshot.last_update_id;
        book.replace(
            snapshot.bids.into_iter().map(|l| l.into_tuple()),
            snapshot.asks.into_iter().map(|l| l.into_tuple()),
            Some(last_update_id),
        );
        book.trim_to_depth(self.depth);
        if let Err(crate::error::RecorderError::CrossedBook { best_bid, best_ask }) =
            book.validate_crossed()
        {
            self.state = SyncState::Resyncing;
            self.buffer.clear();
            return Ok(SyncOutcome::CrossedBook { best_bid, best_ask });
        }

        self.try_bridge(book, last_update_id)
    }

    fn on_diff(&mut self, book: &mut OrderBook, diff: DiffMessage) -> Result<SyncOutcome> {
        match self.state {
            SyncState::Connecting | SyncState::WaitingSnapshot | SyncState::Syncing => {
                // Unbounded FIFO: `max_buffer` is a warn threshold surfaced by
                // the orchestrator's heartbeat, never an eviction bound — a
                // dropped diff here would silently poison the eventual bridge
                // (§4.3 step 1, §9 "exceeding max_buffer_warn triggers a
                // diagnostic, not a drop").
                self.buffer.push_back(diff);
                Ok(SyncOutcome::Buffered)
            }
            SyncState::Synced => {
                let last_u = book.last_applied_u();
                if let Some(last_u) = last_u {
                    if diff.last_update_id <= last_u {
                        // Retransmitted/duplicate diff — discard silently,
                        // never a gap (§4.3 tie-breaks).
                        return Ok(SyncOutcome::Duplicate);
                    }
                }
                let expected = last_u.map(|u| u + 1).unwrap_or(diff.first_update_id);
                if diff.first_update_id != expected {
                    let got = diff.first_update_id;
                    self.state = SyncState::Resyncing;
                    self.buffer.clear();
                    self.buffer.push_back(diff);
                    return Ok(SyncOutcome::Gap { expected, got });
                }
                self.apply_diff(book, diff)
            }
            SyncState::Resyncing => {
                self.buffer.push_back(diff);
                Ok(SyncOutcome::Buffered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use std::str::FromStr;

    use super::*;
    use crate::model::RawLevel;

    fn level(price: &str, qty: &str) -> RawLevel {
        RawLevel {
            price: Decimal::from_str(price).unwrap(),
            qty: Decimal::from_str(qty).unwrap(),
            raw_price: price.to_string(),
            raw_qty: qty.to_string(),
        }
    }

    fn snapshot(last_update_id: u64) -> Snapshot {
        Snapshot {
            bids: vec![level("100", "1")],
            asks: vec![level("101", "1")],
            last_update_id,
            checksum: None,
            raw_bytes: vec![],
        }
    }

    fn diff(first: u64, last: u64) -> DiffMessage {
        DiffMessage {
            event_time_ms: 0,
            first_update_id: first,
            last_update_id: last,
            bids: vec![level("100", "2")],
            asks: vec![],
            checksum: None,
            raw: String::new(),
        }
    }

    #[test]
    fn buffers_pre_snapshot_and_bridges_on_snapshot() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();

        assert_eq!(
            engine.on_diff(&mut book, diff(150, 155)).unwrap(),
            SyncOutcome::Buffered
        );
        assert_eq!(
            engine.on_diff(&mut book, diff(156, 160)).unwrap(),
            SyncOutcome::Buffered
        );

        let outcome = engine.on_snapshot(&mut book, snapshot(153)).unwrap();
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(book.last_applied_u(), Some(160));
    }

    #[test]
    fn stale_snapshot_is_detected_when_buffer_does_not_bridge() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();

        engine.on_diff(&mut book, diff(500, 505)).unwrap();
        let outcome = engine.on_snapshot(&mut book, snapshot(100)).unwrap();
        assert_eq!(outcome, SyncOutcome::StaleSnapshot);
        assert_eq!(engine.state(), SyncState::Syncing);
    }

    #[test]
    fn gap_in_buffered_catchup_after_bridge_is_detected() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();

        // Bridge covers 153, but the next buffered diff skips ahead instead
        // of continuing from u=155 — a gap that opened during buffering,
        // before the snapshot even arrived.
        engine.on_diff(&mut book, diff(150, 155)).unwrap();
        engine.on_diff(&mut book, diff(158, 160)).unwrap();

        let outcome = engine.on_snapshot(&mut book, snapshot(153)).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Gap {
                expected: 156,
                got: 158
            }
        );
        assert_eq!(engine.state(), SyncState::Resyncing);
        assert_eq!(book.last_applied_u(), Some(155));
    }

    #[test]
    fn gap_after_sync_resets_to_resyncing() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();
        engine.on_snapshot(&mut book, snapshot(100)).unwrap();

        let outcome = engine.on_diff(&mut book, diff(105, 110)).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Gap {
                expected: 101,
                got: 105
            }
        );
        assert_eq!(engine.state(), SyncState::Resyncing);
    }

    #[test]
    fn bridge_beyond_the_front_of_the_buffer_is_found() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();

        // A stray reordered diff sits ahead of the one that actually
        // bridges the snapshot. Checking only `buffer.front()` would miss
        // the bridge entirely and wrongly declare the snapshot stale.
        engine.on_diff(&mut book, diff(200, 210)).unwrap();
        engine.on_diff(&mut book, diff(96, 105)).unwrap();

        let outcome = engine.on_snapshot(&mut book, snapshot(100)).unwrap();
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(book.last_applied_u(), Some(105));
    }

    #[test]
    fn duplicate_diff_in_synced_state_is_discarded_not_a_gap() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();
        engine.on_snapshot(&mut book, snapshot(100)).unwrap();
        engine.on_diff(&mut book, diff(101, 102)).unwrap();

        // A retransmitted diff whose range is already fully covered.
        let outcome = engine.on_diff(&mut book, diff(100, 101)).unwrap();
        assert_eq!(outcome, SyncOutcome::Duplicate);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(book.last_applied_u(), Some(102));
    }

    #[test]
    fn empty_buffer_at_snapshot_time_goes_straight_to_synced() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();

        let outcome = engine.on_snapshot(&mut book, snapshot(100)).unwrap();
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(book.last_applied_u(), Some(100));
    }

    #[test]
    fn contiguous_diff_applies_cleanly() {
        let mut engine = SeqEngine::new(1000);
        let mut book = OrderBook::new();
        engine.mark_connecting();
        engine.on_snapshot(&mut book, snapshot(100)).unwrap();

        let outcome = engine.on_diff(&mut book, diff(101, 102)).unwrap();
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(book.last_applied_u(), Some(102));
    }
}

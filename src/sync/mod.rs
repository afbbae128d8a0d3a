pub mod checksum_engine;
pub mod seq_engine;

use crate::error::Result;
use crate::model::{DiffMessage, Snapshot};
use crate::order_book::OrderBook;

pub use checksum_engine::{ChecksumEngine, ChecksumFlavor};
pub use seq_engine::SeqEngine;

/// The book-sync state machine's position (§4.3, §4.4). `Resyncing` covers
/// both a detected sequence gap and a detected checksum mismatch; in both
/// cases the orchestrator drops the book and re-enters at `WaitingSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Connecting,
    WaitingSnapshot,
    Syncing,
    Synced,
    Resyncing,
}

/// What happened as a result of feeding one diff/snapshot/checksum frame
/// into a sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Applied to the book; nothing else to report.
    Applied,
    /// Buffered pending a snapshot bridge (pre-sync, Binance only).
    Buffered,
    /// A retransmitted/duplicate diff (`u <= last_applied_u`) arrived in
    /// `Synced`; silently discarded per §4.3's tie-breaks, never applied and
    /// never persisted as a fresh book top.
    Duplicate,
    /// A sequence-id gap was detected; the engine has already reset to
    /// `Syncing` and the caller must fetch a fresh snapshot (§4.3 step 5).
    Gap { expected: u64, got: u64 },
    /// A CRC32 checksum mismatch was detected; the engine has already reset
    /// to `Resyncing` and the caller must re-subscribe/re-snapshot (§4.4).
    ChecksumMismatch { local: u32, received: u32 },
    /// The pre-sync buffer never bridged the snapshot (ran dry, or the
    /// first buffered event already starts after the snapshot) — the
    /// snapshot is stale and must be re-fetched (§4.3 Open Question: stale
    /// snapshot policy).
    StaleSnapshot,
    /// Book crossed (`best_bid >= best_ask`) after an apply; the engine has
    /// already reset to `Resyncing` and the caller must re-snapshot (§4.1,
    /// §7 `CrossedBook`). Unlike the other error kinds in §7, this one is
    /// surfaced as a sync outcome rather than an `Err`, since a crossed book
    /// is a recoverable condition the state machine handles, not a fault
    /// that should abort the run.
    CrossedBook { best_bid: String, best_ask: String },
}

/// Unifies the sequence-id (Binance) and checksum (Kraken/Bitfinex) sync
/// strategies behind one interface so the orchestrator (C6) can drive
/// either without knowing which exchange it's talking to (§9 "Sum-type
/// discrimination" extends to the sync strategy too).
pub trait SyncEngine {
    fn state(&self) -> SyncState;
    fn on_snapshot(&mut self, book: &mut OrderBook, snapshot: Snapshot) -> Result<SyncOutcome>;
    fn on_diff(&mut self, book: &mut OrderBook, diff: DiffMessage) -> Result<SyncOutcome>;

    /// Only meaningful for checksum engines fed a standalone checksum frame
    /// (Bitfinex's `cs` message); a no-op for sequence-bridged exchanges.
    fn on_checksum_frame(&mut self, _book: &OrderBook, _received: u32) -> Result<SyncOutcome> {
        Ok(SyncOutcome::Applied)
    }

    fn mark_connecting(&mut self);

    /// Diffs currently sitting in a pre-sync/resync buffer, for the
    /// orchestrator's `MAX_BUFFER_WARN` heartbeat diagnostic (§4.7). Only
    /// `SeqEngine` buffers; checksum engines apply in place and report 0.
    fn buffered_len(&self) -> usize {
        0
    }
}

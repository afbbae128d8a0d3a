use serde::{Deserialize, Serialize};

/// Lifecycle event kinds persisted to the events ledger (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    WsOpen,
    WsClose,
    SnapshotStart,
    SnapshotDone,
    StateChange,
    ResyncStart,
    ResyncDone,
    Gap,
    ChecksumMismatch,
    WindowStart,
    WindowEnd,
    StaleSnapshot,
    Warning,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunStart => "run_start",
            EventKind::RunEnd => "run_end",
            EventKind::WsOpen => "ws_open",
            EventKind::WsClose => "ws_close",
            EventKind::SnapshotStart => "snapshot_start",
            EventKind::SnapshotDone => "snapshot_done",
            EventKind::StateChange => "state_change",
            EventKind::ResyncStart => "resync_start",
            EventKind::ResyncDone => "resync_done",
            EventKind::Gap => "gap",
            EventKind::ChecksumMismatch => "checksum_mismatch",
            EventKind::WindowStart => "window_start",
            EventKind::WindowEnd => "window_end",
            EventKind::StaleSnapshot => "stale_snapshot",
            EventKind::Warning => "warning",
        }
    }
}

/// One row of the events ledger (§3). `(recv_seq, event_id)` totally orders
/// lifecycle events relative to market data (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: u64,
    pub recv_time_ms: i64,
    pub recv_seq: u64,
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub epoch_id: u64,
    pub details_json: String,
}

/// A gap/checksum-mismatch record persisted to the optional gaps stream (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapRecord {
    pub recv_time_ms: i64,
    pub recv_seq: u64,
    pub run_id: String,
    pub epoch_id: u64,
    pub event: String,
    pub details: String,
}

/// Monotonic `event_id` generator, separate from `recv_seq` (distinct counters,
/// per §3: "event_id (monotonic)" is its own field on the event record).
#[derive(Debug, Default)]
pub struct EventIdAllocator(std::sync::atomic::AtomicU64);

impl EventIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

use crate::writer::WriterStream;

/// Error kinds, matching the taxonomy in the design doc. `kind()` maps every
/// variant back to one of these so the orchestrator can decide reconnect-and-resync
/// vs. fatal-exit without matching the full variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportTransient,
    SnapshotTransient,
    SequenceGap,
    ChecksumMismatch,
    CrossedBook,
    DecodeError,
    ConfigInvalid,
    DiskIo,
}

#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    #[error("websocket transport error")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("snapshot fetch failed: {0}")]
    Snapshot(String),

    #[error("sequence gap: expected U == {expected}, got U == {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("checksum mismatch: local {local:08x} != received {received:08x}")]
    ChecksumMismatch { local: u32, received: u32 },

    #[error("crossed book: best_bid {best_bid} >= best_ask {best_ask}")]
    CrossedBook { best_bid: String, best_ask: String },

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("disk i/o error on {stream:?}: {source}")]
    DiskIo {
        stream: WriterStream,
        #[source]
        source: std::io::Error,
    },

    #[error("json error")]
    Json(#[from] serde_json::Error),

    #[error("csv error")]
    Csv(#[from] csv::Error),

    #[error("http error")]
    Http(#[from] reqwest::Error),

    #[error("channel send error")]
    SendClosed,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::Transport(_) => ErrorKind::TransportTransient,
            RecorderError::Snapshot(_) | RecorderError::Http(_) => ErrorKind::SnapshotTransient,
            RecorderError::SequenceGap { .. } => ErrorKind::SequenceGap,
            RecorderError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            RecorderError::CrossedBook { .. } => ErrorKind::CrossedBook,
            RecorderError::Decode(_) | RecorderError::Json(_) => ErrorKind::DecodeError,
            RecorderError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            RecorderError::DiskIo { .. } | RecorderError::Csv(_) => ErrorKind::DiskIo,
            RecorderError::SendClosed => ErrorKind::TransportTransient,
        }
    }

    /// Transient kinds are absorbed locally (reconnect/retry/resync); the others are fatal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportTransient
                | ErrorKind::SnapshotTransient
                | ErrorKind::SequenceGap
                | ErrorKind::ChecksumMismatch
                | ErrorKind::CrossedBook
                | ErrorKind::DecodeError
        )
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

/// Runs a disk operation, retrying exactly once on failure before giving up
/// (§7 `DiskIO`: "Fatal after one retry; flush & exit"). The caller still
/// maps the final `io::Error` to `RecorderError::DiskIo`, which is fatal —
/// this only absorbs a single transient failure (e.g. a momentary `ENOSPC`
/// that clears) before that fatal path is taken.
pub fn retry_disk_io<T>(mut op: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
    match op() {
        Ok(v) => Ok(v),
        Err(_first_attempt) => op(),
    }
}

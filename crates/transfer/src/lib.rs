//! Chunked upload building blocks: byte sources, per-session state,
//! throughput sampling, retry policy, the transport seam and the
//! on-disk resume store.

mod progress;
mod resume;
mod retry;
mod source;
mod state;
mod transport;

pub use progress::{MIN_SAMPLE_INTERVAL, Throughput};
pub use resume::{ResumeEntry, ResumeStore, default_store_path, fingerprint};
pub use retry::{RetryDecision, RetryPolicy};
pub use source::{ChunkSource, FileSource, MemorySource, SourceFuture};
pub use state::{SessionState, StateSnapshot};
pub use transport::{
    ChunkTransport, TransportError, TransportErrorKind, TransportFuture, check_chunk_ack,
};

/// Default chunk size: 4 MiB.
///
/// Each chunk is one PATCH request; the server acknowledges the new offset
/// only after the whole chunk is durably stored.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("range {offset}+{len} is outside the source ({size} bytes)")]
    RangeOutOfBounds { offset: u64, len: usize, size: u64 },

    #[error("source shrank while reading at offset {offset}")]
    SourceTruncated { offset: u64 },

    #[error("offset went backwards: confirmed {confirmed}, reported {reported}")]
    OffsetRegression { confirmed: u64, reported: u64 },

    #[error("offset {offset} exceeds total size {total}")]
    OffsetBeyondTotal { offset: u64, total: u64 },

    #[error("remote session id already set to {0}")]
    SessionIdAlreadySet(String),
}

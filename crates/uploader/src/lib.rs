//! Resumable chunked upload orchestration.
//!
//! The [`UploadSupervisor`] accepts byte sources and runs one session state
//! machine per task over a [`ChunkTransport`](chunkup_transfer::ChunkTransport).
//! Progress is reported through per-task listeners and an aggregated event
//! channel.
//!
//! # Session lifecycle
//!
//! 1. **Create**: obtain a remote session id (or restore a remembered one)
//! 2. **Upload**: send fixed-size chunks strictly in order, retrying
//!    transient failures on the same byte range
//! 3. **Reconcile**: after a pause or restart, probe the server offset and
//!    continue from there
//! 4. **Finish**: emit exactly one `completed` or `failed` event

pub mod error;
pub mod events;
mod session;
pub mod supervisor;
pub mod types;

// Re-export primary types for convenience.
pub use error::UploadError;
pub use events::{Listener, SubscriptionId};
pub use session::SessionOutcome;
pub use supervisor::UploadSupervisor;
pub use types::{FailureKind, TaskId, TaskSnapshot, UploadEvent, UploadTask, UploaderConfig};

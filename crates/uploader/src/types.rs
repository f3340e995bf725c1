//! Data types for the upload flow.

use std::sync::Arc;

use chunkup_protocol::constants::METADATA_FILENAME;
use chunkup_protocol::{Metadata, UploadStatus};
use chunkup_transfer::{ChunkSource, DEFAULT_CHUNK_SIZE, RetryPolicy, StateSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of an upload task, assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One submitted file.
///
/// The source is owned by the task for its whole lifetime; size and metadata
/// never change after creation.
pub struct UploadTask {
    id: TaskId,
    source: Arc<dyn ChunkSource>,
    total_size: u64,
    metadata: Metadata,
}

impl UploadTask {
    pub(crate) fn new(source: Arc<dyn ChunkSource>, metadata: Metadata) -> Self {
        let total_size = source.size();
        Self {
            id: TaskId::new(),
            source,
            total_size,
            metadata,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn source(&self) -> &dyn ChunkSource {
        self.source.as_ref()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Display name: the `filename` metadata entry, or the task id.
    pub fn name(&self) -> String {
        self.metadata
            .get(METADATA_FILENAME)
            .cloned()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Why an upload ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server permanently refused a request (unknown session, bad
    /// offset, size exceeded).
    ServerRejected,
    /// The server acknowledged an offset other than the one sent.
    OffsetMismatch,
    /// Transient failures outlasted the retry schedule.
    GiveUpExhausted,
    /// The remote session could not be created.
    SessionCreationFailed,
    /// The local file could not be read.
    Source,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ServerRejected => "server rejected",
            FailureKind::OffsetMismatch => "offset mismatch",
            FailureKind::GiveUpExhausted => "retries exhausted",
            FailureKind::SessionCreationFailed => "session creation failed",
            FailureKind::Source => "source unreadable",
        };
        f.write_str(s)
    }
}

/// Event emitted for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The remote session was created.
    Created {
        task_id: TaskId,
        remote_session_id: String,
    },
    /// A chunk (or a server probe) advanced the confirmed offset.
    Progress {
        task_id: TaskId,
        bytes_sent: u64,
        total_size: u64,
        speed_bytes_per_sec: f64,
    },
    Paused {
        task_id: TaskId,
    },
    /// Sending continues, after a pause or from a remembered session.
    Resumed {
        task_id: TaskId,
    },
    Completed {
        task_id: TaskId,
        remote_location: String,
    },
    Failed {
        task_id: TaskId,
        kind: FailureKind,
        bytes_sent: u64,
        message: String,
    },
}

impl UploadEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            UploadEvent::Created { task_id, .. }
            | UploadEvent::Progress { task_id, .. }
            | UploadEvent::Paused { task_id }
            | UploadEvent::Resumed { task_id }
            | UploadEvent::Completed { task_id, .. }
            | UploadEvent::Failed { task_id, .. } => *task_id,
        }
    }

    /// Returns `true` for the last event a task will ever emit.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Completed { .. } | UploadEvent::Failed { .. }
        )
    }
}

/// Snapshot row returned by `list_active`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub name: String,
    pub status: UploadStatus,
    pub bytes_sent: u64,
    pub total_size: u64,
    pub speed_bytes_per_sec: f64,
    pub attempt: u32,
    pub remote_session_id: Option<String>,
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub(crate) fn new(task: &UploadTask, state: StateSnapshot) -> Self {
        Self {
            task_id: task.id(),
            name: task.name(),
            status: state.status,
            bytes_sent: state.bytes_sent,
            total_size: state.total_size,
            speed_bytes_per_sec: state.speed_bytes_per_sec,
            attempt: state.attempt,
            remote_session_id: state.remote_session_id,
            error: state.error,
        }
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Bytes per chunk request.
    pub chunk_size: usize,
    /// Sessions allowed to run at once; the rest wait in `pending`.
    pub max_concurrent: usize,
    /// Backoff schedule for transient failures.
    pub retry: RetryPolicy,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: 3,
            retry: RetryPolicy::default(),
        }
    }
}

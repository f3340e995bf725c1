//! Supervisor error types.

use chunkup_protocol::UploadStatus;

use crate::types::TaskId;

/// Errors returned by supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {task_id} cannot do that while {status}")]
    InvalidState {
        task_id: TaskId,
        status: UploadStatus,
    },

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkup_transfer::TransferError),

    #[error("metadata error: {0}")]
    Metadata(#[from] chunkup_protocol::MetadataError),
}

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chunkup_protocol::UploadStatus;
use tokio::time::Instant;

use crate::{Throughput, TransferError};

/// Mutable progress record of one upload (thread-safe).
///
/// Only the owning session loop writes to it; snapshots may be taken from
/// anywhere at any time and never wait on network I/O.
pub struct SessionState {
    inner: RwLock<StateInner>,
}

struct StateInner {
    status: UploadStatus,
    total_size: u64,
    bytes_sent: u64,
    remote_session_id: Option<String>,
    attempt: u32,
    throughput: Throughput,
    error: Option<String>,
}

/// Point-in-time copy of a [`SessionState`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub status: UploadStatus,
    pub total_size: u64,
    pub bytes_sent: u64,
    pub remote_session_id: Option<String>,
    pub attempt: u32,
    pub speed_bytes_per_sec: f64,
    pub error: Option<String>,
}

impl StateSnapshot {
    /// Returns the upload progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return if self.status == UploadStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        self.bytes_sent as f64 / self.total_size as f64 * 100.0
    }
}

impl SessionState {
    /// Creates a pending state for an upload of `total_size` bytes.
    pub fn new(total_size: u64) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                status: UploadStatus::Pending,
                total_size,
                bytes_sent: 0,
                remote_session_id: None,
                attempt: 0,
                throughput: Throughput::new(0, Instant::now()),
                error: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StateInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> UploadStatus {
        self.read().status
    }

    pub fn set_status(&self, status: UploadStatus) {
        self.write().status = status;
    }

    pub fn total_size(&self) -> u64 {
        self.read().total_size
    }

    pub fn bytes_sent(&self) -> u64 {
        self.read().bytes_sent
    }

    /// Bytes not yet confirmed by the server.
    pub fn remaining(&self) -> u64 {
        let s = self.read();
        s.total_size - s.bytes_sent
    }

    pub fn is_complete(&self) -> bool {
        let s = self.read();
        s.bytes_sent == s.total_size
    }

    pub fn remote_session_id(&self) -> Option<String> {
        self.read().remote_session_id.clone()
    }

    /// Records the remote session id. It can be set once per upload.
    pub fn set_remote_session_id(&self, id: &str) -> Result<(), TransferError> {
        let mut s = self.write();
        match &s.remote_session_id {
            Some(existing) if existing != id => {
                Err(TransferError::SessionIdAlreadySet(existing.clone()))
            }
            _ => {
                s.remote_session_id = Some(id.to_string());
                Ok(())
            }
        }
    }

    pub fn attempt(&self) -> u32 {
        self.read().attempt
    }

    /// Counts one more consecutive failure and returns the new count.
    pub fn record_failure(&self) -> u32 {
        let mut s = self.write();
        s.attempt = s.attempt.saturating_add(1);
        s.attempt
    }

    pub fn reset_attempts(&self) {
        self.write().attempt = 0;
    }

    /// Applies a confirmed chunk acknowledgment and returns the new speed.
    ///
    /// Resets the attempt counter and refreshes the throughput sample.
    pub fn confirm_chunk(&self, new_offset: u64, now: Instant) -> Result<f64, TransferError> {
        let mut s = self.write();
        check_offset(&s, new_offset)?;
        s.bytes_sent = new_offset;
        s.attempt = 0;
        Ok(s.throughput.sample(new_offset, now))
    }

    /// Adopts the server's offset after a probe.
    ///
    /// The server is authoritative when it holds more than we recorded. It
    /// may never hold less than an offset it already acknowledged. Returns
    /// `true` if the local offset moved.
    pub fn reconcile(&self, server_offset: u64, now: Instant) -> Result<bool, TransferError> {
        let mut s = self.write();
        check_offset(&s, server_offset)?;
        let moved = server_offset != s.bytes_sent;
        s.bytes_sent = server_offset;
        s.throughput.rebase(server_offset, now);
        Ok(moved)
    }

    /// Restarts throughput sampling at the current offset.
    pub fn rebase_throughput(&self, now: Instant) {
        let mut s = self.write();
        let bytes = s.bytes_sent;
        s.throughput.rebase(bytes, now);
    }

    pub fn speed(&self) -> f64 {
        self.read().throughput.bytes_per_second()
    }

    /// Estimated time to finish at the current speed.
    pub fn eta(&self) -> Option<Duration> {
        let s = self.read();
        s.throughput.eta(s.total_size - s.bytes_sent)
    }

    /// Marks the upload failed with a message.
    pub fn fail(&self, error: &str) {
        let mut s = self.write();
        s.status = UploadStatus::Failed;
        s.error = Some(error.to_string());
    }

    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let s = self.read();
        StateSnapshot {
            status: s.status,
            total_size: s.total_size,
            bytes_sent: s.bytes_sent,
            remote_session_id: s.remote_session_id.clone(),
            attempt: s.attempt,
            speed_bytes_per_sec: s.throughput.bytes_per_second(),
            error: s.error.clone(),
        }
    }
}

fn check_offset(s: &StateInner, offset: u64) -> Result<(), TransferError> {
    if offset < s.bytes_sent {
        return Err(TransferError::OffsetRegression {
            confirmed: s.bytes_sent,
            reported: offset,
        });
    }
    if offset > s.total_size {
        return Err(TransferError::OffsetBeyondTotal {
            offset,
            total: s.total_size,
        });
    }
    Ok(())
}

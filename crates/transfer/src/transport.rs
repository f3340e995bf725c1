use std::future::Future;
use std::pin::Pin;

use chunkup_protocol::Metadata;

/// Future returned by [`ChunkTransport`] operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Failure of a single network exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response: connection refused or reset, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The server refused the request (4xx): session gone, bad offset,
    /// size exceeded.
    #[error("server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    /// The server is temporarily unable to serve the request (5xx, overload).
    #[error("server unavailable ({status}): {message}")]
    ServerUnavailable { status: u16, message: String },

    /// The acknowledged offset is not `offset + chunk length`.
    #[error("offset mismatch: expected {expected}, server reported {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },
}

/// Retry classification of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Network,
    ServerRejected,
    ServerUnavailable,
}

impl TransportErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, TransportErrorKind::ServerRejected)
    }
}

impl TransportError {
    /// Classifies the error. An offset mismatch counts as a rejection.
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Network(_) => TransportErrorKind::Network,
            TransportError::ServerRejected { .. } | TransportError::OffsetMismatch { .. } => {
                TransportErrorKind::ServerRejected
            }
            TransportError::ServerUnavailable { .. } => TransportErrorKind::ServerUnavailable,
        }
    }
}

/// Abstract connection to the upload server.
///
/// Every call is one round trip. The session drives these strictly in
/// sequence, so implementations never see two requests for the same
/// session at once.
pub trait ChunkTransport: Send + Sync {
    /// Creates a resumable session and returns its identifier.
    fn create_session<'a>(
        &'a self,
        metadata: &'a Metadata,
        total_size: u64,
    ) -> TransportFuture<'a, String>;

    /// Sends `data` at `offset` and returns the offset the server now holds.
    fn send_chunk<'a>(
        &'a self,
        session_id: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> TransportFuture<'a, u64>;

    /// Asks the server how many bytes it has durably accepted.
    fn probe_offset<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, u64>;

    /// Location reported to the caller once the upload completes.
    fn location(&self, session_id: &str) -> String {
        session_id.to_string()
    }
}

/// Validates a chunk acknowledgment.
///
/// The server must report exactly `offset + len`; anything else is a
/// protocol violation.
pub fn check_chunk_ack(offset: u64, len: usize, reported: u64) -> Result<u64, TransportError> {
    let expected = offset + len as u64;
    if reported == expected {
        Ok(reported)
    } else {
        Err(TransportError::OffsetMismatch {
            expected,
            actual: reported,
        })
    }
}

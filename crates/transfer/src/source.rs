use std::future::Future;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::UNIX_EPOCH;

use crate::TransferError;

/// Future returned by [`ChunkSource::read_range`].
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + 'a>>;

/// Read-only, random-access bytes of one upload.
///
/// The size is fixed when the source is created; a source that shrinks
/// underneath an active upload yields [`TransferError::SourceTruncated`].
pub trait ChunkSource: Send + Sync {
    /// Total length in bytes.
    fn size(&self) -> u64;

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> SourceFuture<'_>;

    /// Stable identity used to find a resumable session after a restart.
    ///
    /// Sources without a durable identity return `None` and are never
    /// resumed across restarts.
    fn identity(&self) -> Option<String> {
        None
    }
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<(), TransferError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(TransferError::RangeOutOfBounds { offset, len, size }),
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A local file read in ranges on the blocking pool.
pub struct FileSource {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
    size: u64,
    modified_nanos: Option<u128>,
}

impl FileSource {
    /// Opens `path` and snapshots its size and modification time.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let meta = file.metadata()?;
        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos());
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
            size: meta.len(),
            modified_nanos,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, len: usize) -> SourceFuture<'_> {
        let file = Arc::clone(&self.file);
        let size = self.size;
        Box::pin(async move {
            check_range(offset, len, size)?;
            tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransferError> {
                let mut f = file.lock().unwrap_or_else(PoisonError::into_inner);
                f.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                match f.read_exact(&mut buf) {
                    Ok(()) => Ok(buf),
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        Err(TransferError::SourceTruncated { offset })
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
        })
    }

    fn identity(&self) -> Option<String> {
        let path = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let modified = self.modified_nanos.unwrap_or_default();
        Some(format!("{}|{}|{}", path.display(), self.size, modified))
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// Bytes held in memory.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
    identity: Option<String>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::from(data.into()),
            identity: None,
        }
    }

    /// Gives the source a stable identity so it participates in resume.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl ChunkSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, len: usize) -> SourceFuture<'_> {
        Box::pin(async move {
            check_range(offset, len, self.size())?;
            let start = offset as usize;
            Ok(self.data[start..start + len].to_vec())
        })
    }

    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }
}

//! End-to-end scenarios against an in-memory tus-like server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkup_protocol::{Metadata, UploadStatus};
use chunkup_transfer::{
    ChunkTransport, MemorySource, ResumeStore, RetryPolicy, TransportError, TransportFuture,
};
use chunkup_uploader::{FailureKind, UploadEvent, UploadSupervisor, UploaderConfig};
use tokio::sync::mpsc;

const MB: usize = 1024 * 1024;

/// Keeps uploaded bytes per session, like a tus server would.
#[derive(Default)]
struct MemoryServer {
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU32,
    /// Fail every send once the session holds this many bytes.
    fail_from: Mutex<Option<u64>>,
    chunk_delay: Duration,
    patches: AtomicU32,
}

impl MemoryServer {
    fn with_delay(delay: Duration) -> Self {
        Self {
            chunk_delay: delay,
            ..Self::default()
        }
    }

    fn stored(&self, session_id: &str) -> Option<Vec<u8>> {
        self.uploads.lock().unwrap().get(session_id).cloned()
    }
}

impl ChunkTransport for MemoryServer {
    fn create_session<'a>(
        &'a self,
        _metadata: &'a Metadata,
        _total_size: u64,
    ) -> TransportFuture<'a, String> {
        Box::pin(async move {
            let id = format!(
                "http://mem/files/{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            );
            self.uploads.lock().unwrap().insert(id.clone(), Vec::new());
            Ok(id)
        })
    }

    fn send_chunk<'a>(
        &'a self,
        session_id: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            tokio::time::sleep(self.chunk_delay).await;
            self.patches.fetch_add(1, Ordering::SeqCst);
            let mut uploads = self.uploads.lock().unwrap();
            let stored = uploads
                .get_mut(session_id)
                .ok_or_else(|| TransportError::ServerRejected {
                    status: 404,
                    message: "unknown upload".into(),
                })?;
            if let Some(limit) = *self.fail_from.lock().unwrap()
                && stored.len() as u64 >= limit
            {
                return Err(TransportError::Network("connection reset".into()));
            }
            if stored.len() as u64 != offset {
                return Err(TransportError::ServerRejected {
                    status: 409,
                    message: "offset conflict".into(),
                });
            }
            stored.extend_from_slice(data);
            Ok(stored.len() as u64)
        })
    }

    fn probe_offset<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            self.uploads
                .lock()
                .unwrap()
                .get(session_id)
                .map(|d| d.len() as u64)
                .ok_or(TransportError::ServerRejected {
                    status: 404,
                    message: "unknown upload".into(),
                })
        })
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

fn config(chunk_size: usize) -> UploaderConfig {
    UploaderConfig {
        chunk_size,
        max_concurrent: 3,
        retry: RetryPolicy::from_millis(&[0, 10]),
    }
}

async fn next_terminal(rx: &mut mpsc::Receiver<UploadEvent>) -> UploadEvent {
    loop {
        let event = rx.recv().await.expect("event channel closed");
        if event.is_terminal() {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn ten_megabytes_in_one_megabyte_chunks() {
    let server = Arc::new(MemoryServer::default());
    let mut sup = UploadSupervisor::new(server.clone(), config(MB));
    let mut rx = sup.take_events().unwrap();
    let data = payload(10 * MB);

    let id = sup
        .enqueue(Arc::new(MemorySource::new(data.clone())), Metadata::new())
        .unwrap();

    let mut progress = Vec::new();
    let location = loop {
        match rx.recv().await.unwrap() {
            UploadEvent::Progress { bytes_sent, .. } => progress.push(bytes_sent),
            UploadEvent::Completed {
                task_id,
                remote_location,
            } => {
                assert_eq!(task_id, id);
                break remote_location;
            }
            UploadEvent::Failed { message, .. } => panic!("upload failed: {message}"),
            _ => {}
        }
    };

    let expected: Vec<u64> = (1..=10).map(|i| (i * MB) as u64).collect();
    assert_eq!(progress, expected);
    assert_eq!(server.stored(&location).unwrap(), data);
    assert_eq!(server.patches.load(Ordering::SeqCst), 10);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_upload_stops_progress() {
    let server = Arc::new(MemoryServer::with_delay(Duration::from_millis(100)));
    let mut sup = UploadSupervisor::new(server.clone(), config(4));
    let mut rx = sup.take_events().unwrap();

    let id = sup
        .enqueue(Arc::new(MemorySource::new(payload(400))), Metadata::new())
        .unwrap();

    // Let a few chunks through, then cancel while one is in flight.
    loop {
        if let UploadEvent::Progress { bytes_sent: 12, .. } = rx.recv().await.unwrap() {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    sup.cancel(id).unwrap();
    assert!(sup.list_active().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
    // The in-flight chunk resolved, nothing was sent after it.
    assert_eq!(server.patches.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_continue_from_server_offset() {
    let server = Arc::new(MemoryServer::with_delay(Duration::from_millis(100)));
    let mut sup = UploadSupervisor::new(server.clone(), config(4));
    let mut rx = sup.take_events().unwrap();
    let data = payload(40);

    let id = sup
        .enqueue(Arc::new(MemorySource::new(data.clone())), Metadata::new())
        .unwrap();
    loop {
        if let UploadEvent::Progress { bytes_sent: 8, .. } = rx.recv().await.unwrap() {
            break;
        }
    }
    sup.pause(id).unwrap();

    // The in-flight chunk completes, then the session parks.
    loop {
        if let UploadEvent::Paused { task_id } = rx.recv().await.unwrap() {
            assert_eq!(task_id, id);
            break;
        }
    }
    assert_eq!(sup.snapshot(id).unwrap().status, UploadStatus::Paused);
    let held = sup.snapshot(id).unwrap().bytes_sent;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sup.snapshot(id).unwrap().bytes_sent, held);

    sup.resume(id).unwrap();
    assert_eq!(rx.recv().await.unwrap(), UploadEvent::Resumed { task_id: id });
    match next_terminal(&mut rx).await {
        UploadEvent::Completed {
            remote_location, ..
        } => assert_eq!(server.stored(&remote_location).unwrap(), data),
        other => panic!("expected completion, got {other:?}"),
    }
    // No chunk was sent twice.
    assert_eq!(server.patches.load(Ordering::SeqCst), 10);
}

#[tokio::test(start_paused = true)]
async fn interrupted_upload_resumes_in_new_supervisor() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("video.mp4");
    let data = payload(64);
    std::fs::write(&path, &data).unwrap();
    let store_path = tmp.path().join("resume.json");
    let endpoint = "http://mem/files/";

    let server = Arc::new(MemoryServer::default());
    *server.fail_from.lock().unwrap() = Some(24);

    // First run: the connection drops for good after 24 bytes.
    {
        let store = Arc::new(ResumeStore::new(store_path.clone()).unwrap());
        let mut sup = UploadSupervisor::new(server.clone(), config(8))
            .with_resume_store(Arc::clone(&store), endpoint);
        let mut rx = sup.take_events().unwrap();
        let id = sup.enqueue_path(&path).unwrap();
        assert_eq!(sup.snapshot(id).unwrap().name, "video.mp4");

        match next_terminal(&mut rx).await {
            UploadEvent::Failed {
                kind, bytes_sent, ..
            } => {
                assert_eq!(kind, FailureKind::GiveUpExhausted);
                assert_eq!(bytes_sent, 24);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
    }

    // Second run: the same file resumes the remembered session.
    *server.fail_from.lock().unwrap() = None;
    let patches_before = server.patches.load(Ordering::SeqCst);
    let store = Arc::new(ResumeStore::new(store_path).unwrap());
    let mut sup = UploadSupervisor::new(server.clone(), config(8))
        .with_resume_store(Arc::clone(&store), endpoint);
    let mut rx = sup.take_events().unwrap();
    let id = sup.enqueue_path(&path).unwrap();

    assert_eq!(rx.recv().await.unwrap(), UploadEvent::Resumed { task_id: id });
    match rx.recv().await.unwrap() {
        UploadEvent::Progress { bytes_sent, .. } => assert_eq!(bytes_sent, 24),
        other => panic!("expected probed progress, got {other:?}"),
    }
    match next_terminal(&mut rx).await {
        UploadEvent::Completed {
            remote_location, ..
        } => assert_eq!(server.stored(&remote_location).unwrap(), data),
        other => panic!("expected completion, got {other:?}"),
    }
    // Only the remaining 40 bytes went out.
    assert_eq!(server.patches.load(Ordering::SeqCst) - patches_before, 5);
    assert!(store.is_empty());
}

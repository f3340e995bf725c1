//! Upload supervisor: owns every task, bounds concurrency and aggregates
//! events for the caller.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chunkup_protocol::{Metadata, UploadStatus, encode_metadata, metadata_for_path};
use chunkup_transfer::{
    ChunkSource, ChunkTransport, FileSource, ResumeStore, SessionState, fingerprint,
};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::events::{EventSink, Listener, Listeners, SubscriptionId};
use crate::session::{ResumeLink, UploadSession};
use crate::types::{TaskId, TaskSnapshot, UploadEvent, UploadTask, UploaderConfig};

/// Capacity of the aggregated event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct TaskEntry {
    task: Arc<UploadTask>,
    state: Arc<SessionState>,
    listeners: Arc<Listeners>,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

struct ResumeConfig {
    store: Arc<ResumeStore>,
    endpoint: String,
}

/// Runs any number of uploads, at most `max_concurrent` at a time.
///
/// Every method except `enqueue` is a snapshot or a flag flip and never
/// waits on network I/O. Dropping the supervisor cancels all sessions.
pub struct UploadSupervisor {
    transport: Arc<dyn ChunkTransport>,
    config: UploaderConfig,
    tasks: RwLock<Vec<TaskEntry>>,
    permits: Arc<Semaphore>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    resume: Option<ResumeConfig>,
    shutdown: CancellationToken,
}

impl UploadSupervisor {
    pub fn new(transport: Arc<dyn ChunkTransport>, config: UploaderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            transport,
            config,
            tasks: RwLock::new(Vec::new()),
            permits,
            events_tx,
            events_rx: Some(events_rx),
            resume: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Remembers created sessions in `store` so uploads to `endpoint` can
    /// be resumed by a later supervisor.
    pub fn with_resume_store(mut self, store: Arc<ResumeStore>, endpoint: impl Into<String>) -> Self {
        self.resume = Some(ResumeConfig {
            store,
            endpoint: endpoint.into(),
        });
        self
    }

    /// Takes the aggregated event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Submits a source for upload and returns immediately.
    ///
    /// The task waits in `pending` until a concurrency slot frees up. Must
    /// be called from within a tokio runtime.
    pub fn enqueue(
        &self,
        source: Arc<dyn ChunkSource>,
        metadata: Metadata,
    ) -> Result<TaskId, UploadError> {
        encode_metadata(&metadata)?;

        let task = Arc::new(UploadTask::new(source, metadata));
        let task_id = task.id();
        let state = Arc::new(SessionState::new(task.total_size()));
        let listeners = Arc::new(Listeners::default());
        let cancel = self.shutdown.child_token();
        let (pause_tx, pause_rx) = watch::channel(false);

        let mut session = UploadSession::new(
            Arc::clone(&task),
            Arc::clone(&state),
            Arc::clone(&self.transport),
            self.config.retry.clone(),
            self.config.chunk_size,
            cancel.clone(),
            pause_rx,
            EventSink::new(Arc::clone(&listeners), self.events_tx.clone()),
        );
        if let Some(link) = self.resume_link(&task) {
            session = session.with_resume(link);
        }

        self.write_tasks().push(TaskEntry {
            task: Arc::clone(&task),
            state,
            listeners,
            cancel: cancel.clone(),
            pause: pause_tx,
        });
        info!(task = %task_id, name = %task.name(), size = task.total_size(), "upload enqueued");

        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            let outcome = session.run().await;
            debug!(task = %task_id, ?outcome, "session finished");
        });

        Ok(task_id)
    }

    /// Opens a local file and enqueues it with `filename`/`filetype`
    /// metadata.
    pub fn enqueue_path(&self, path: &Path) -> Result<TaskId, UploadError> {
        let source = FileSource::open(path)?;
        self.enqueue(Arc::new(source), metadata_for_path(path))
    }

    /// Stops a task and removes it from the active set.
    ///
    /// A request already in flight is allowed to finish; its result is
    /// discarded and no further events are emitted.
    pub fn cancel(&self, task_id: TaskId) -> Result<(), UploadError> {
        let entry = {
            let mut tasks = self.write_tasks();
            let index = tasks
                .iter()
                .position(|e| e.task.id() == task_id)
                .ok_or(UploadError::TaskNotFound(task_id))?;
            tasks.remove(index)
        };
        entry.cancel.cancel();
        info!(task = %task_id, bytes_sent = entry.state.bytes_sent(), "upload cancelled");
        Ok(())
    }

    /// Asks an uploading task to pause at the next chunk boundary.
    pub fn pause(&self, task_id: TaskId) -> Result<(), UploadError> {
        let tasks = self.read_tasks();
        let entry = find(&tasks, task_id)?;
        let status = entry.state.status();
        if status != UploadStatus::Uploading {
            return Err(UploadError::InvalidState { task_id, status });
        }
        entry.pause.send_replace(true);
        debug!(task = %task_id, "pause requested");
        Ok(())
    }

    /// Resumes a paused task (or withdraws a pause not yet honored).
    pub fn resume(&self, task_id: TaskId) -> Result<(), UploadError> {
        let tasks = self.read_tasks();
        let entry = find(&tasks, task_id)?;
        let status = entry.state.status();
        if status != UploadStatus::Paused && !*entry.pause.borrow() {
            return Err(UploadError::InvalidState { task_id, status });
        }
        entry.pause.send_replace(false);
        debug!(task = %task_id, "resume requested");
        Ok(())
    }

    /// Removes a completed or failed task from the list.
    pub fn dismiss(&self, task_id: TaskId) -> Result<(), UploadError> {
        let mut tasks = self.write_tasks();
        let index = tasks
            .iter()
            .position(|e| e.task.id() == task_id)
            .ok_or(UploadError::TaskNotFound(task_id))?;
        let status = tasks[index].state.status();
        if !status.is_terminal() {
            return Err(UploadError::InvalidState { task_id, status });
        }
        tasks.remove(index);
        Ok(())
    }

    /// Snapshot of every task in enqueue order, including finished tasks
    /// that were not dismissed.
    pub fn list_active(&self) -> Vec<TaskSnapshot> {
        self.read_tasks()
            .iter()
            .map(|e| TaskSnapshot::new(&e.task, e.state.snapshot()))
            .collect()
    }

    pub fn snapshot(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.read_tasks()
            .iter()
            .find(|e| e.task.id() == task_id)
            .map(|e| TaskSnapshot::new(&e.task, e.state.snapshot()))
    }

    /// Registers a listener for one task's events until its terminal event.
    pub fn subscribe(&self, task_id: TaskId, listener: Listener) -> Result<SubscriptionId, UploadError> {
        let tasks = self.read_tasks();
        let entry = find(&tasks, task_id)?;
        entry.listeners.add(listener).ok_or(UploadError::InvalidState {
            task_id,
            status: entry.state.status(),
        })
    }

    /// Returns `true` if the listener was still registered.
    pub fn unsubscribe(&self, task_id: TaskId, subscription: SubscriptionId) -> Result<bool, UploadError> {
        let tasks = self.read_tasks();
        Ok(find(&tasks, task_id)?.listeners.remove(subscription))
    }

    fn resume_link(&self, task: &UploadTask) -> Option<ResumeLink> {
        let resume = self.resume.as_ref()?;
        let identity = task.source().identity()?;
        let fp = fingerprint(&identity, &resume.endpoint);

        let restored = match resume.store.get(&fp) {
            Some(entry) if entry.total_size == task.total_size() => {
                debug!(task = %task.id(), session = %entry.remote_session_id, "found resumable session");
                Some(entry.remote_session_id)
            }
            Some(_) => {
                if let Err(e) = resume.store.remove(&fp) {
                    warn!(task = %task.id(), error = %e, "failed to forget stale upload session");
                }
                None
            }
            None => None,
        };

        Some(ResumeLink {
            store: Arc::clone(&resume.store),
            fingerprint: fp,
            restored,
        })
    }

    fn read_tasks(&self) -> std::sync::RwLockReadGuard<'_, Vec<TaskEntry>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tasks(&self) -> std::sync::RwLockWriteGuard<'_, Vec<TaskEntry>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UploadSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn find(tasks: &[TaskEntry], task_id: TaskId) -> Result<&TaskEntry, UploadError> {
    tasks
        .iter()
        .find(|e| e.task.id() == task_id)
        .ok_or(UploadError::TaskNotFound(task_id))
}

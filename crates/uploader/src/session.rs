//! The per-file upload state machine.
//!
//! ```text
//! pending -> creating -> uploading <-> retry-wait -> completed
//!                            |  ^
//!                            v  |
//!                           paused
//! ```
//!
//! `failed` is reachable from `creating`, `uploading` and retry-wait. All
//! transitions of one session run on a single task: chunk N+1 is never sent
//! before chunk N is acknowledged, permanently rejected, or out of retries.

use std::sync::Arc;

use chunkup_protocol::UploadStatus;
use chunkup_transfer::{
    ChunkTransport, ResumeEntry, ResumeStore, RetryDecision, RetryPolicy, SessionState,
    TransportError, check_chunk_ack,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventSink;
use crate::types::{FailureKind, UploadEvent, UploadTask};

/// How a session run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed { remote_location: String },
    Failed { kind: FailureKind, bytes_sent: u64 },
    Cancelled,
}

/// Link between a session and its resume store entry.
pub(crate) struct ResumeLink {
    pub(crate) store: Arc<ResumeStore>,
    pub(crate) fingerprint: String,
    /// Remote session remembered from an earlier run.
    pub(crate) restored: Option<String>,
}

/// Why the session loop stopped early.
enum Halt {
    Cancelled,
    Failed(FailureKind, String),
}

/// Outcome of waiting out a retry delay.
enum Backoff {
    Retry,
    Paused,
}

/// Drives one task from `pending` to `completed` or `failed`.
pub(crate) struct UploadSession {
    task: Arc<UploadTask>,
    state: Arc<SessionState>,
    transport: Arc<dyn ChunkTransport>,
    policy: RetryPolicy,
    chunk_size: usize,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
    events: EventSink,
    resume: Option<ResumeLink>,
}

impl UploadSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task: Arc<UploadTask>,
        state: Arc<SessionState>,
        transport: Arc<dyn ChunkTransport>,
        policy: RetryPolicy,
        chunk_size: usize,
        cancel: CancellationToken,
        pause: watch::Receiver<bool>,
        events: EventSink,
    ) -> Self {
        Self {
            task,
            state,
            transport,
            policy,
            chunk_size: chunk_size.max(1),
            cancel,
            pause,
            events,
            resume: None,
        }
    }

    pub(crate) fn with_resume(mut self, link: ResumeLink) -> Self {
        self.resume = Some(link);
        self
    }

    /// Runs the state machine to its end and emits the terminal event.
    pub(crate) async fn run(mut self) -> SessionOutcome {
        let task_id = self.task.id();
        match self.drive().await {
            Ok(remote_location) => {
                self.state.set_status(UploadStatus::Completed);
                self.forget();
                info!(task = %task_id, location = %remote_location, "upload completed");
                self.emit(UploadEvent::Completed {
                    task_id,
                    remote_location: remote_location.clone(),
                });
                SessionOutcome::Completed { remote_location }
            }
            Err(Halt::Cancelled) => {
                debug!(task = %task_id, "upload cancelled");
                SessionOutcome::Cancelled
            }
            Err(Halt::Failed(kind, message)) => {
                let bytes_sent = self.state.bytes_sent();
                self.state.fail(&message);
                if matches!(kind, FailureKind::ServerRejected | FailureKind::OffsetMismatch) {
                    self.forget();
                }
                warn!(task = %task_id, %kind, bytes_sent, error = %message, "upload failed");
                self.emit(UploadEvent::Failed {
                    task_id,
                    kind,
                    bytes_sent,
                    message,
                });
                SessionOutcome::Failed { kind, bytes_sent }
            }
        }
    }

    async fn drive(&mut self) -> Result<String, Halt> {
        self.check_cancelled()?;

        let restored = self.resume.as_mut().and_then(|r| r.restored.take());
        let (session_id, needs_probe) = match restored {
            Some(id) => {
                self.state
                    .set_remote_session_id(&id)
                    .map_err(|e| Halt::Failed(FailureKind::ServerRejected, e.to_string()))?;
                self.state.set_status(UploadStatus::Uploading);
                info!(task = %self.task.id(), session = %id, "resuming remembered session");
                self.emit(UploadEvent::Resumed {
                    task_id: self.task.id(),
                });
                (id, true)
            }
            None => (self.create().await?, false),
        };

        self.upload(&session_id, needs_probe).await?;
        Ok(self.transport.location(&session_id))
    }

    /// `creating`: obtains the remote session id.
    async fn create(&self) -> Result<String, Halt> {
        self.state.set_status(UploadStatus::Creating);
        debug!(task = %self.task.id(), size = self.task.total_size(), "creating remote session");

        loop {
            let result = self
                .transport
                .create_session(self.task.metadata(), self.task.total_size())
                .await;
            self.check_cancelled()?;

            match result {
                Ok(id) => {
                    self.state
                        .set_remote_session_id(&id)
                        .map_err(|e| Halt::Failed(FailureKind::SessionCreationFailed, e.to_string()))?;
                    self.state.reset_attempts();
                    self.state.set_status(UploadStatus::Uploading);
                    self.remember(&id);
                    debug!(task = %self.task.id(), session = %id, "remote session created");
                    self.emit(UploadEvent::Created {
                        task_id: self.task.id(),
                        remote_session_id: id.clone(),
                    });
                    return Ok(id);
                }
                Err(err) => match self.backoff(&err, false).await {
                    Ok(_) => continue,
                    Err(Halt::Failed(_, message)) => {
                        return Err(Halt::Failed(FailureKind::SessionCreationFailed, message));
                    }
                    Err(halt) => return Err(halt),
                },
            }
        }
    }

    /// `uploading`: sends chunks until the server holds every byte.
    async fn upload(&self, session_id: &str, mut needs_probe: bool) -> Result<(), Halt> {
        let total = self.task.total_size();
        // Set while the next probe follows a failed chunk rather than a
        // pause or restore; the retry counter then survives the probe.
        let mut retrying = false;

        loop {
            self.check_cancelled()?;

            if *self.pause.borrow() {
                self.wait_while_paused().await?;
                needs_probe = true;
                retrying = false;
            }
            if needs_probe {
                if !self.reconcile(session_id, retrying).await? {
                    continue;
                }
                needs_probe = false;
                retrying = false;
            }

            let offset = self.state.bytes_sent();
            if offset == total {
                return Ok(());
            }

            let len = (total - offset).min(self.chunk_size as u64) as usize;
            let data = self
                .task
                .source()
                .read_range(offset, len)
                .await
                .map_err(|e| Halt::Failed(FailureKind::Source, e.to_string()))?;

            let result = self.transport.send_chunk(session_id, offset, &data).await;
            // A cancel issued while the chunk was in flight discards its result.
            self.check_cancelled()?;

            match result.and_then(|reported| check_chunk_ack(offset, len, reported)) {
                Ok(new_offset) => {
                    let speed = self
                        .state
                        .confirm_chunk(new_offset, Instant::now())
                        .map_err(|e| Halt::Failed(FailureKind::OffsetMismatch, e.to_string()))?;
                    debug!(
                        task = %self.task.id(),
                        bytes_sent = new_offset,
                        total,
                        speed = format_args!("{speed:.0}"),
                        "chunk acknowledged"
                    );
                    self.emit(UploadEvent::Progress {
                        task_id: self.task.id(),
                        bytes_sent: new_offset,
                        total_size: total,
                        speed_bytes_per_sec: speed,
                    });
                }
                Err(err) if !err.kind().is_retryable() => {
                    return Err(Halt::Failed(permanent_kind(&err), err.to_string()));
                }
                Err(err) => {
                    self.backoff(&err, true).await?;
                    // The server may have stored part of the interrupted chunk.
                    needs_probe = true;
                    retrying = true;
                }
            }
        }
    }

    /// Probes the server offset and adopts it.
    ///
    /// With `retrying` set the attempt counter is only reset if the server
    /// moved past the local offset. Returns `false` if a pause interrupted
    /// the probe's retry wait.
    async fn reconcile(&self, session_id: &str, retrying: bool) -> Result<bool, Halt> {
        loop {
            let result = self.transport.probe_offset(session_id).await;
            self.check_cancelled()?;

            match result {
                Ok(server_offset) => {
                    let before = self.state.bytes_sent();
                    let moved = self
                        .state
                        .reconcile(server_offset, Instant::now())
                        .map_err(|e| Halt::Failed(FailureKind::OffsetMismatch, e.to_string()))?;
                    if moved || !retrying {
                        self.state.reset_attempts();
                    }
                    if moved {
                        info!(
                            task = %self.task.id(),
                            local = before,
                            server = server_offset,
                            "adopted server offset"
                        );
                        self.emit(UploadEvent::Progress {
                            task_id: self.task.id(),
                            bytes_sent: server_offset,
                            total_size: self.task.total_size(),
                            speed_bytes_per_sec: self.state.speed(),
                        });
                    }
                    return Ok(true);
                }
                Err(err) if !err.kind().is_retryable() => {
                    return Err(Halt::Failed(permanent_kind(&err), err.to_string()));
                }
                Err(err) => match self.backoff(&err, true).await? {
                    Backoff::Retry => continue,
                    Backoff::Paused => return Ok(false),
                },
            }
        }
    }

    /// Counts the failure, consults the policy and waits out the delay.
    ///
    /// The wait ends early on cancel and, if `pausable`, on a pause request.
    async fn backoff(&self, err: &TransportError, pausable: bool) -> Result<Backoff, Halt> {
        let attempt = self.state.record_failure();
        match self.policy.decide(err.kind(), attempt) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    task = %self.task.id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                let mut pause = self.pause.clone();
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(Halt::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(Backoff::Retry),
                    Ok(_) = pause.wait_for(|paused| *paused), if pausable => Ok(Backoff::Paused),
                }
            }
            RetryDecision::GiveUp => {
                let kind = if err.kind().is_retryable() {
                    FailureKind::GiveUpExhausted
                } else {
                    permanent_kind(err)
                };
                Err(Halt::Failed(kind, err.to_string()))
            }
        }
    }

    /// `paused`: waits for resume or cancel.
    async fn wait_while_paused(&self) -> Result<(), Halt> {
        let task_id = self.task.id();
        self.state.set_status(UploadStatus::Paused);
        info!(task = %task_id, bytes_sent = self.state.bytes_sent(), "upload paused");
        self.emit(UploadEvent::Paused { task_id });

        let mut pause = self.pause.clone();
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
            resumed = pause.wait_for(|paused| !*paused) => {
                if resumed.is_err() {
                    // Supervisor dropped the task.
                    return Err(Halt::Cancelled);
                }
            }
        }

        self.state.set_status(UploadStatus::Uploading);
        self.state.rebase_throughput(Instant::now());
        info!(task = %task_id, "upload resumed");
        self.emit(UploadEvent::Resumed { task_id });
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: UploadEvent) {
        self.events.emit(event);
    }

    fn remember(&self, session_id: &str) {
        if let Some(link) = &self.resume {
            let entry = ResumeEntry {
                remote_session_id: session_id.to_string(),
                total_size: self.task.total_size(),
            };
            if let Err(e) = link.store.save(&link.fingerprint, entry) {
                warn!(task = %self.task.id(), error = %e, "failed to remember upload session");
            }
        }
    }

    fn forget(&self) {
        if let Some(link) = &self.resume
            && let Err(e) = link.store.remove(&link.fingerprint)
        {
            warn!(task = %self.task.id(), error = %e, "failed to forget upload session");
        }
    }
}

fn permanent_kind(err: &TransportError) -> FailureKind {
    match err {
        TransportError::OffsetMismatch { .. } => FailureKind::OffsetMismatch,
        _ => FailureKind::ServerRejected,
    }
}

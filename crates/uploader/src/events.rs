//! Per-task listeners and the aggregated event channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::types::UploadEvent;

/// Callback invoked with every event of a subscribed task.
///
/// Listeners run on the session's task and must not block or call back
/// into the supervisor's subscribe/unsubscribe.
pub type Listener = Box<dyn Fn(&UploadEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Listeners of one task. Closed after the terminal event.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    inner: Mutex<ListenersInner>,
}

#[derive(Default)]
struct ListenersInner {
    entries: Vec<(SubscriptionId, Listener)>,
    closed: bool,
}

impl Listeners {
    /// Adds a listener. Returns `None` once the task has finished.
    pub(crate) fn add(&self, listener: Listener) -> Option<SubscriptionId> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return None;
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.entries.push((id, listener));
        Some(id)
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|(sid, _)| *sid != id);
        inner.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    fn dispatch(&self, event: &UploadEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, listener) in &inner.entries {
            listener(event);
        }
        if event.is_terminal() {
            inner.entries.clear();
            inner.closed = true;
        }
    }
}

/// Fans one task's events out to its listeners and the supervisor channel.
#[derive(Clone)]
pub(crate) struct EventSink {
    listeners: Arc<Listeners>,
    events_tx: mpsc::Sender<UploadEvent>,
}

impl EventSink {
    pub(crate) fn new(listeners: Arc<Listeners>, events_tx: mpsc::Sender<UploadEvent>) -> Self {
        Self {
            listeners,
            events_tx,
        }
    }

    /// Delivers an event. Never waits on a slow consumer: if the aggregated
    /// channel is full an intermediate event is dropped from it with a
    /// warning, while a terminal event is handed to a background send so
    /// consumers waiting for it always see it.
    pub(crate) fn emit(&self, event: UploadEvent) {
        trace!(task = %event.task_id(), event = ?event, "upload event");
        self.listeners.dispatch(&event);
        match self.events_tx.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(event)) if event.is_terminal() => {
                match Handle::try_current() {
                    Ok(handle) => {
                        debug!(task = %event.task_id(), "event channel full, deferring terminal event");
                        let tx = self.events_tx.clone();
                        // Last event of the task, so nothing can overtake it.
                        handle.spawn(async move {
                            let _ = tx.send(event).await;
                        });
                    }
                    Err(_) => {
                        warn!(task = %event.task_id(), "event channel full outside a runtime, dropping terminal event");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(task = %event.task_id(), "event channel full, dropping event");
            }
        }
    }
}

//! Session lifecycle events
//!
//! Listeners register per event kind (or for everything) and can be removed
//! again by id. A broadcast channel carries the same events for async
//! consumers.

use crate::utils::error::ErrorKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted by a recorder session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    /// Something failed
    Error { kind: ErrorKind, message: String },
    /// Encoders started after the countdown
    RecordingStarted,
    /// Recording stopped and a result is ready
    #[serde(rename_all = "camelCase")]
    RecordingEnded { duration_ms: u64 },
    /// Countdown cancelled or recording discarded
    RecordingCancelled,
    MediaUploadStarted,
    #[serde(rename_all = "camelCase")]
    MediaUploadEnded { entry_id: String },
    #[serde(rename_all = "camelCase")]
    MediaUploadCancelled {
        deleted_entry_ids: Vec<String>,
        cleanup_errors: Vec<String>,
    },
    MediaUploadProgress { loaded: u64, total: u64 },
    CountdownTick { remaining: u32 },
    #[serde(rename_all = "camelCase")]
    RecordingProgress { elapsed_ms: u64 },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Error { .. } => EventKind::Error,
            SessionEvent::RecordingStarted => EventKind::RecordingStarted,
            SessionEvent::RecordingEnded { .. } => EventKind::RecordingEnded,
            SessionEvent::RecordingCancelled => EventKind::RecordingCancelled,
            SessionEvent::MediaUploadStarted => EventKind::MediaUploadStarted,
            SessionEvent::MediaUploadEnded { .. } => EventKind::MediaUploadEnded,
            SessionEvent::MediaUploadCancelled { .. } => EventKind::MediaUploadCancelled,
            SessionEvent::MediaUploadProgress { .. } => EventKind::MediaUploadProgress,
            SessionEvent::CountdownTick { .. } => EventKind::CountdownTick,
            SessionEvent::RecordingProgress { .. } => EventKind::RecordingProgress,
        }
    }
}

/// Event names as exposed to the host page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Error,
    RecordingStarted,
    RecordingEnded,
    RecordingCancelled,
    MediaUploadStarted,
    MediaUploadEnded,
    MediaUploadCancelled,
    MediaUploadProgress,
    CountdownTick,
    RecordingProgress,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Error,
        EventKind::RecordingStarted,
        EventKind::RecordingEnded,
        EventKind::RecordingCancelled,
        EventKind::MediaUploadStarted,
        EventKind::MediaUploadEnded,
        EventKind::MediaUploadCancelled,
        EventKind::MediaUploadProgress,
        EventKind::CountdownTick,
        EventKind::RecordingProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::RecordingStarted => "recordingStarted",
            EventKind::RecordingEnded => "recordingEnded",
            EventKind::RecordingCancelled => "recordingCancelled",
            EventKind::MediaUploadStarted => "mediaUploadStarted",
            EventKind::MediaUploadEnded => "mediaUploadEnded",
            EventKind::MediaUploadCancelled => "mediaUploadCancelled",
            EventKind::MediaUploadProgress => "mediaUploadProgress",
            EventKind::CountdownTick => "countdownTick",
            EventKind::RecordingProgress => "recordingProgress",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event '{}'", s))
    }
}

/// Callback invoked for each matching event
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by `add_event_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: Option<EventKind>,
    listener: Listener,
}

struct EventBusInner {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<SessionEvent>,
}

/// Fan-out point for session events
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(EventBusInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    /// Register a listener for one kind of event
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Register a listener for every event
    pub fn add_any_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    fn register(&self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .push(Registration { id, kind, listener });
        id
    }

    /// Returns whether a listener was removed
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    pub fn remove_all_listeners(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Subscribe to every event through a channel
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!("Emitting {}", event.kind());

        // Listeners run outside the lock so they may add or remove listeners.
        let matching: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|r| r.kind.map_or(true, |kind| kind == event.kind()))
            .map(|r| r.listener.clone())
            .collect();
        for listener in matching {
            listener(&event);
        }

        let _ = self.inner.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Storage event bus.
//!
//! Both stores announce reads, writes, clears and errors here. Listeners are
//! plain callbacks invoked synchronously, in registration order, by
//! [`EventBus::emit_event`]. Listeners registered under [`WILDCARD`] see every
//! event in addition to the type-specific ones.
//!
//! # Dispatch rules
//!
//! - The event is appended to a bounded history ring ([`MAX_EVENT_HISTORY`])
//!   before any listener runs.
//! - The listener list is copy-on-write: dispatch iterates over a snapshot, so
//!   a listener may unsubscribe itself (or others) while being called.
//! - A panicking listener is caught and logged; the remaining listeners still run
//!   and `emit_event` returns normally.
//!
//! Besides callbacks, [`EventBus::subscribe`] hands out a broadcast receiver for
//! consumers living on other tasks (another "tab" sharing the same storage).
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use locale_store::clock::SystemClock;
//! use locale_store::events::{EventBus, WILDCARD};
//! use serde_json::json;
//!
//! let bus = EventBus::new(Arc::new(SystemClock), None);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! bus.add_event_listener(WILDCARD, move |ev| sink.lock().unwrap().push(ev.event_type.clone()));
//!
//! bus.emit("history:written", json!({ "count": 1 }));
//! assert_eq!(*seen.lock().unwrap(), vec!["history:written".to_string()]);
//! ```

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::ClockHandle;
use crate::diagnostics::Diagnostics;

pub const MAX_EVENT_HISTORY: usize = 100;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;
pub const WILDCARD: &str = "*";

pub const HISTORY_READ: &str = "history:read";
pub const HISTORY_WRITTEN: &str = "history:written";
pub const HISTORY_CLEARED: &str = "history:cleared";
pub const HISTORY_IMPORTED: &str = "history:imported";
pub const PREFERENCE_READ: &str = "preference:read";
pub const PREFERENCE_WRITTEN: &str = "preference:written";
pub const PREFERENCE_CLEARED: &str = "preference:cleared";
pub const PREFERENCE_IMPORTED: &str = "preference:imported";
pub const STORAGE_ERROR: &str = "storage:error";
pub const BACKEND_FALLBACK: &str = "backend:fallback";
pub const MAINTENANCE_COMPLETED: &str = "maintenance:completed";
pub const BACKUP_CREATED: &str = "backup:created";
pub const BACKUP_RESTORED: &str = "backup:restored";
pub const CONFIG_UPDATED: &str = "config:updated";
pub const HEALTH_CHECKED: &str = "health:checked";
pub const SYNC_COMPLETED: &str = "sync:completed";
pub const SYNC_FAILED: &str = "sync:failed";

/// An ephemeral notification; kept only in the history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl StorageEvent {
    pub fn new<S: Into<String>>(event_type: S, payload: Value, timestamp: i64) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp,
        }
    }
}

pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Handle returned by [`EventBus::add_event_listener`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    event_type: String,
    listener: Listener,
}

/// A handle for receiving events on another task.
pub type Subscription = broadcast::Receiver<StorageEvent>;

pub struct EventBus {
    listeners: RwLock<Arc<Vec<Registration>>>,
    history: Mutex<VecDeque<StorageEvent>>,
    capacity: usize,
    tx: broadcast::Sender<StorageEvent>,
    clock: ClockHandle,
    diagnostics: Option<Arc<Diagnostics>>,
}

impl EventBus {
    pub fn new(clock: ClockHandle, diagnostics: Option<Arc<Diagnostics>>) -> Self {
        Self::with_capacity(MAX_EVENT_HISTORY, clock, diagnostics)
    }

    pub fn with_capacity(capacity: usize, clock: ClockHandle, diagnostics: Option<Arc<Diagnostics>>) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
            clock,
            diagnostics,
        }
    }

    pub fn add_event_listener<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(Uuid::new_v4());
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.as_ref().clone();
        next.push(Registration {
            id,
            event_type: event_type.to_string(),
            listener: Arc::new(listener),
        });
        *guard = Arc::new(next);
        id
    }

    /// Returns `true` if a listener was removed.
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.rewrite_listeners(|reg| !(reg.id == id && reg.event_type == event_type))
    }

    /// Removes every listener for `event_type`, or all listeners when `None`.
    pub fn remove_all_listeners(&self, event_type: Option<&str>) {
        match event_type {
            Some(t) => {
                self.rewrite_listeners(|reg| reg.event_type != t);
            }
            None => {
                *self.listeners.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
            }
        }
    }

    fn rewrite_listeners(&self, keep: impl Fn(&Registration) -> bool) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<Registration> = guard.iter().filter(|r| keep(r)).cloned().collect();
        let removed = next.len() != guard.len();
        *guard = Arc::new(next);
        removed
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.snapshot().iter().filter(|r| r.event_type == event_type).count()
    }

    fn snapshot(&self) -> Arc<Vec<Registration>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stamps and emits an event with the bus clock.
    pub fn emit(&self, event_type: &str, payload: Value) {
        self.emit_event(StorageEvent::new(event_type, payload, self.clock.now_ms()));
    }

    pub fn emit_event(&self, event: StorageEvent) {
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            while history.len() >= self.capacity && !history.is_empty() {
                history.pop_front();
            }
            if self.capacity > 0 {
                history.push_back(event.clone());
            }
        }

        for reg in self.snapshot().iter() {
            if reg.event_type != event.event_type && reg.event_type != WILDCARD {
                continue;
            }
            let listener = reg.listener.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                let message = format!("listener for '{}' panicked on '{}'", reg.event_type, event.event_type);
                match &self.diagnostics {
                    Some(d) => d.error(&message, None),
                    None => log::error!(target: "locale_store", "{message}"),
                }
            }
        }

        // Fails only when nobody is subscribed, which is fine.
        let _ = self.tx.send(event);
    }

    /// Most recent events, oldest first. `limit` keeps only the newest `n`.
    pub fn get_event_history(&self, limit: Option<usize>) -> Vec<StorageEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_event_history(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }
}

//! History and preference stores.
//!
//! Both stores keep a [`LocaleDetectionHistory`] under one key and share the
//! same machinery, [`RecordStore`]; they differ only in the key, the size bound
//! and the event names, captured by [`StoreKind`].
//!
//! Every mutating operation holds the store's write lock for its whole
//! load-modify-persist cycle, so a single process never issues two concurrent
//! writes to the same key. Other processes sharing the backend are not
//! coordinated with: the last writer wins.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde_json::{json, Value};

use crate::backend::{BackendKind, BackendManager};
use crate::clock::ClockHandle;
use crate::codec::CodecHandle;
use crate::config::{ConfigManager, StorageConfig};
use crate::diagnostics::Diagnostics;
use crate::errors::StoreError;
use crate::events::{self, EventBus};
use crate::record::{DetectionRecord, LocaleDetectionHistory, StorageOperationResult};

pub mod cache;

pub use cache::HistoryCache;

pub const HISTORY_KEY: &str = "locale_detection_history";
pub const PREFERENCE_KEY: &str = "locale_preference_history";

/// Which of the two record lists a store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    History,
    Preference,
}

impl StoreKind {
    pub fn key(self) -> &'static str {
        match self {
            StoreKind::History => HISTORY_KEY,
            StoreKind::Preference => PREFERENCE_KEY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StoreKind::History => "history",
            StoreKind::Preference => "preferences",
        }
    }

    /// Size bound for this list.
    pub fn max_records(self, config: &StorageConfig) -> usize {
        match self {
            StoreKind::History => config.performance.max_entries,
            StoreKind::Preference => config.performance.max_preference_entries,
        }
    }

    /// Age after which a record is eligible for expiry.
    pub fn retention_ms(self, config: &StorageConfig) -> u64 {
        match self {
            StoreKind::History => config.retention.history,
            StoreKind::Preference => config.retention.preferences,
        }
    }

    fn read_event(self) -> &'static str {
        match self {
            StoreKind::History => events::HISTORY_READ,
            StoreKind::Preference => events::PREFERENCE_READ,
        }
    }

    pub(crate) fn written_event(self) -> &'static str {
        match self {
            StoreKind::History => events::HISTORY_WRITTEN,
            StoreKind::Preference => events::PREFERENCE_WRITTEN,
        }
    }

    fn cleared_event(self) -> &'static str {
        match self {
            StoreKind::History => events::HISTORY_CLEARED,
            StoreKind::Preference => events::PREFERENCE_CLEARED,
        }
    }

    pub(crate) fn imported_event(self) -> &'static str {
        match self {
            StoreKind::History => events::HISTORY_IMPORTED,
            StoreKind::Preference => events::PREFERENCE_IMPORTED,
        }
    }
}

/// Collaborators injected into every store.
#[derive(Clone)]
pub struct StoreContext {
    pub backends: Arc<BackendManager>,
    pub config: Arc<ConfigManager>,
    pub codec: CodecHandle,
    pub events: Arc<EventBus>,
    pub diagnostics: Arc<Diagnostics>,
    pub clock: ClockHandle,
}

pub struct RecordStore {
    kind: StoreKind,
    ctx: StoreContext,
    cache: HistoryCache,
    write_lock: Mutex<()>,
}

/// Events raised while the write lock is held. They are emitted only after
/// the lock is released, so a listener may call back into the store.
#[derive(Default)]
struct Outbox {
    pending: Vec<(String, Value)>,
}

impl Outbox {
    fn push(&mut self, event_type: &str, payload: Value) {
        self.pending.push((event_type.to_string(), payload));
    }
}

impl RecordStore {
    pub fn new(kind: StoreKind, ctx: StoreContext) -> Self {
        Self {
            kind,
            ctx,
            cache: HistoryCache::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn history(ctx: StoreContext) -> Self {
        Self::new(StoreKind::History, ctx)
    }

    pub fn preferences(ctx: StoreContext) -> Self {
        Self::new(StoreKind::Preference, ctx)
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn max_records(&self) -> usize {
        self.kind.max_records(&self.ctx.config.snapshot())
    }

    /// Age after which records of this store expire.
    pub fn retention_ms(&self) -> u64 {
        self.kind.retention_ms(&self.ctx.config.snapshot())
    }

    /// Current list, from the cache when it is fresh.
    ///
    /// A missing key reads as an empty history. A payload that cannot be
    /// decoded yields a failed result.
    pub fn read(&self) -> StorageOperationResult<LocaleDetectionHistory> {
        let now = self.ctx.clock.now_ms();
        let ttl = self.ctx.config.snapshot().retention.cache;
        if let Some((history, source)) = self.cache.get(now, ttl) {
            return StorageOperationResult::ok(history, source, now);
        }

        let started = Instant::now();
        let generation = self.cache.generation();
        match self.load_from_backend() {
            Ok((history, source)) => {
                self.cache.put(history.clone(), source, now, generation);
                self.ctx.events.emit(
                    self.kind.read_event(),
                    json!({ "key": self.kind.key(), "count": history.history.len(), "backend": source }),
                );
                StorageOperationResult::ok(history, source, now).with_response_time(elapsed_ms(started))
            }
            Err(e) => {
                let mut outbox = Outbox::default();
                self.report_error("read", &e, &mut outbox);
                self.flush(outbox);
                StorageOperationResult::failed(e, None, now).with_response_time(elapsed_ms(started))
            }
        }
    }

    fn load_from_backend(&self) -> Result<(LocaleDetectionHistory, Option<BackendKind>), StoreError> {
        match self.ctx.backends.get(self.kind.key()) {
            None => Ok((LocaleDetectionHistory::default(), None)),
            Some((stored, source)) => {
                let plain = self.ctx.codec.decode(&stored)?;
                Ok((serde_json::from_str(&plain)?, Some(source)))
            }
        }
    }

    /// The persisted document as raw JSON, bypassing the cache. Used to
    /// inspect records that would not survive typed decoding.
    pub fn read_raw(&self) -> Option<Value> {
        let (stored, _) = self.ctx.backends.get(self.kind.key())?;
        let plain = self.ctx.codec.decode(&stored).ok()?;
        serde_json::from_str(&plain).ok()
    }

    /// Records in stored order; empty when the list is unreadable.
    pub fn get_all(&self) -> Vec<DetectionRecord> {
        self.read().data.map(|h| h.history).unwrap_or_default()
    }

    /// Appends `record`, evicting the oldest entries beyond the size bound.
    ///
    /// An unreadable stored payload fails the append and is left in place for
    /// restore or clear to deal with.
    pub fn append(&self, record: DetectionRecord) -> StorageOperationResult<LocaleDetectionHistory> {
        let violations = record.violations(0);
        if !violations.is_empty() {
            let err = StoreError::Validation(violations);
            let mut outbox = Outbox::default();
            self.report_error("append", &err, &mut outbox);
            self.flush(outbox);
            return StorageOperationResult::failed(err, None, self.ctx.clock.now_ms());
        }

        self.locked(|outbox| {
            let now = self.ctx.clock.now_ms();
            let mut current = match self.load_from_backend() {
                Ok((history, _)) => history,
                Err(e) => {
                    self.report_error("append", &e, outbox);
                    return StorageOperationResult::failed(e, None, now);
                }
            };
            current.history.push(record);
            let evicted = enforce_size(&mut current.history, self.max_records());
            current.touch(now);
            self.commit(current, self.kind.written_event(), evicted, outbox)
        })
    }

    /// Replaces the whole list. The size bound still applies (newest kept) and
    /// `lastUpdated` is stamped with the current time.
    pub fn replace(&self, history: LocaleDetectionHistory, event: &str) -> StorageOperationResult<LocaleDetectionHistory> {
        self.locked(|outbox| self.replace_locked(history, event, outbox))
    }

    fn replace_locked(
        &self,
        mut history: LocaleDetectionHistory,
        event: &str,
        outbox: &mut Outbox,
    ) -> StorageOperationResult<LocaleDetectionHistory> {
        let now = self.ctx.clock.now_ms();
        let previous = self
            .load_from_backend()
            .map(|(h, _)| h.last_updated)
            .unwrap_or_default();
        let evicted = enforce_size(&mut history.history, self.max_records());
        history.last_updated = previous.max(now);
        self.commit(history, event, evicted, outbox)
    }

    /// Runs `f` over the current list under the write lock and persists the
    /// result if `f` reports a change.
    pub fn update<R>(&self, event: &str, f: impl FnOnce(&mut Vec<DetectionRecord>) -> (bool, R)) -> Result<R, StoreError> {
        self.locked(|outbox| {
            let (mut history, _) = self.load_from_backend()?;
            let (changed, out) = f(&mut history.history);
            if changed {
                self.replace_locked(history, event, outbox)
                    .into_result()
                    .map_err(StoreError::BackendUnavailable)?;
            }
            Ok(out)
        })
    }

    /// Drops the persisted key and the cached copy.
    pub fn clear(&self) -> StorageOperationResult<()> {
        self.locked(|outbox| {
            let now = self.ctx.clock.now_ms();
            let removed = self.ctx.backends.remove(self.kind.key());
            self.cache.invalidate();
            match removed {
                Ok(()) => {
                    outbox.push(self.kind.cleared_event(), json!({ "key": self.kind.key() }));
                    StorageOperationResult::ok((), None, now)
                }
                Err(e) => {
                    self.report_error("clear", &e, outbox);
                    StorageOperationResult::failed(e, None, now)
                }
            }
        })
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Runs `f` under the write lock, then emits what it queued.
    fn locked<T>(&self, f: impl FnOnce(&mut Outbox) -> T) -> T {
        let mut outbox = Outbox::default();
        let out = {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut outbox)
        };
        self.flush(outbox);
        out
    }

    fn flush(&self, outbox: Outbox) {
        for (event_type, payload) in outbox.pending {
            self.ctx.events.emit(&event_type, payload);
        }
    }

    fn commit(
        &self,
        mut history: LocaleDetectionHistory,
        event: &str,
        evicted: usize,
        outbox: &mut Outbox,
    ) -> StorageOperationResult<LocaleDetectionHistory> {
        let started = Instant::now();
        let now = self.ctx.clock.now_ms();
        let max_bytes = self.ctx.config.snapshot().performance.max_size;
        let result = self.encode_within(&mut history, max_bytes).and_then(|(encoded, trimmed)| {
            let receipt = self.ctx.backends.write(self.kind.key(), &encoded)?;
            Ok((receipt, trimmed))
        });
        self.cache.invalidate();

        match result {
            Ok((receipt, trimmed)) => {
                if let Some(fallback) = receipt.fallback {
                    outbox.push(events::BACKEND_FALLBACK, fallback);
                }
                outbox.push(
                    event,
                    json!({
                        "key": self.kind.key(),
                        "count": history.history.len(),
                        "backend": receipt.backend,
                        "evicted": evicted + trimmed,
                    }),
                );
                StorageOperationResult::ok(history, Some(receipt.backend), now).with_response_time(elapsed_ms(started))
            }
            Err(e) => {
                self.report_error("write", &e, outbox);
                StorageOperationResult::failed(e, None, now).with_response_time(elapsed_ms(started))
            }
        }
    }

    /// Serializes and encodes `history`, dropping the oldest records until the
    /// payload fits in `max_bytes`. Returns the payload and the number dropped.
    fn encode_within(&self, history: &mut LocaleDetectionHistory, max_bytes: usize) -> Result<(String, usize), StoreError> {
        let mut dropped = 0;
        loop {
            let encoded = self.ctx.codec.encode(&serde_json::to_string(history)?)?;
            if encoded.len() <= max_bytes {
                return Ok((encoded, dropped));
            }
            let count = history.history.len();
            if count == 0 {
                return Err(StoreError::QuotaExceeded(format!(
                    "{} needs {} bytes, performance.maxSize is {max_bytes}",
                    self.kind.key(),
                    encoded.len()
                )));
            }
            let per_record = (encoded.len() / count).max(1);
            let excess = ((encoded.len() - max_bytes) / per_record).clamp(1, count);
            history.history.drain(..excess);
            dropped += excess;
        }
    }

    fn report_error(&self, operation: &str, err: &StoreError, outbox: &mut Outbox) {
        self.ctx.diagnostics.error(
            &format!("{} {operation} failed: {err}", self.kind.key()),
            None,
        );
        outbox.push(
            events::STORAGE_ERROR,
            json!({ "key": self.kind.key(), "operation": operation, "error": err.to_string() }),
        );
    }
}

/// Drops records from the front until at most `max` remain; returns how many went.
pub(crate) fn enforce_size(records: &mut Vec<DetectionRecord>, max: usize) -> usize {
    let excess = records.len().saturating_sub(max);
    records.drain(..excess);
    excess
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::AdapterHandle;
    use crate::clock::ManualClock;
    use crate::codec::PassthroughCodec;

    pub struct Fixture {
        pub clock: Arc<ManualClock>,
        pub ctx: StoreContext,
    }

    impl Fixture {
        pub fn new(config: StorageConfig, adapters: Vec<AdapterHandle>) -> Self {
            let clock = Arc::new(ManualClock::new(1_700_000_000_000));
            let diagnostics = Arc::new(Diagnostics::new(&config, clock.clone()));
            let events = Arc::new(EventBus::new(clock.clone(), Some(diagnostics.clone())));
            let backends = Arc::new(BackendManager::new(adapters, diagnostics.clone()).with_events(events.clone()));
            Self {
                ctx: StoreContext {
                    backends,
                    config: Arc::new(ConfigManager::new(config)),
                    codec: Arc::new(PassthroughCodec),
                    events,
                    diagnostics,
                    clock: clock.clone(),
                },
                clock,
            }
        }

        pub fn with_max_entries(max: usize) -> Self {
            let mut config = StorageConfig::default();
            config.performance.max_entries = max;
            config.performance.max_preference_entries = max;
            Self::new(config, vec![])
        }
    }
}

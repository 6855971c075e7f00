use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::backend::{AdapterHandle, BackendKind, MemoryBackend};
use crate::config::StorageConfig;
use crate::diagnostics::Diagnostics;
use crate::errors::StoreError;
use crate::events::{EventBus, BACKEND_FALLBACK};

/// Adapters available to [`BackendManager::from_config`], keyed by medium.
///
/// The config decides which of them are used and in which order; a medium that
/// is listed in `fallbackStorage` but missing here is skipped.
#[derive(Default, Clone)]
pub struct BackendSet {
    adapters: HashMap<BackendKind, AdapterHandle>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under its own kind, replacing any previous one.
    pub fn with(mut self, adapter: AdapterHandle) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: AdapterHandle) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: BackendKind) -> Option<AdapterHandle> {
        self.adapters.get(&kind).cloned()
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.adapters.contains_key(&kind)
    }
}

/// Ordered fallback chain over backend adapters.
///
/// Writes go to the first adapter that accepts them; reads come from the first
/// adapter holding a value. The memory adapter is always the last link, so a
/// write only fails if a custom chain is made of adapters that all refuse it.
pub struct BackendManager {
    adapters: Vec<AdapterHandle>,
    diagnostics: Arc<Diagnostics>,
    events: Option<Arc<EventBus>>,
}

impl BackendManager {
    /// Uses `adapters` in the given order. A memory adapter is moved to the end,
    /// or appended if the list has none.
    pub fn new(adapters: Vec<AdapterHandle>, diagnostics: Arc<Diagnostics>) -> Self {
        let (mut chain, memory): (Vec<_>, Vec<_>) = adapters
            .into_iter()
            .partition(|a| a.kind() != BackendKind::Memory);
        match memory.into_iter().next() {
            Some(m) => chain.push(m),
            None => chain.push(Arc::new(MemoryBackend::new())),
        }
        Self {
            adapters: chain,
            diagnostics,
            events: None,
        }
    }

    /// Builds the chain from `errorHandling.fallbackStorage`, keeping only media
    /// that are enabled in `backends` and present in `available`.
    pub fn from_config(config: &StorageConfig, available: &BackendSet, diagnostics: Arc<Diagnostics>) -> Self {
        let mut chain: Vec<AdapterHandle> = Vec::new();
        for &kind in &config.error_handling.fallback_storage {
            if kind == BackendKind::Memory || chain.iter().any(|a| a.kind() == kind) {
                continue;
            }
            if !config.backends.is_enabled(kind) {
                diagnostics.debug(&format!("backend {kind} is disabled, skipping"), None);
                continue;
            }
            match available.get(kind) {
                Some(adapter) => chain.push(adapter),
                None => diagnostics.debug(&format!("no adapter registered for {kind}, skipping"), None),
            }
        }
        if let Some(memory) = available.get(BackendKind::Memory) {
            chain.push(memory);
        }
        Self::new(chain, diagnostics)
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn adapters(&self) -> &[AdapterHandle] {
        &self.adapters
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.adapters.iter().map(|a| a.kind()).collect()
    }

    /// The medium writes go to while nothing fails.
    pub fn primary(&self) -> BackendKind {
        self.adapters.first().map_or(BackendKind::Memory, |a| a.kind())
    }

    /// Writes `value` and returns the medium that accepted it.
    ///
    /// When an earlier adapter refused the write, its copy of `key` (if any) is
    /// removed so a later read cannot return the stale value.
    pub fn set(&self, key: &str, value: &str) -> Result<BackendKind, StoreError> {
        let receipt = self.write(key, value)?;
        if let (Some(events), Some(payload)) = (&self.events, receipt.fallback) {
            events.emit(BACKEND_FALLBACK, payload);
        }
        Ok(receipt.backend)
    }

    /// Same as [`set`](Self::set), but the `backend:fallback` payload is handed
    /// back instead of emitted. Callers holding a lock emit it once released.
    pub fn write(&self, key: &str, value: &str) -> Result<WriteReceipt, StoreError> {
        let mut failures = Vec::new();

        for (i, adapter) in self.adapters.iter().enumerate() {
            let kind = adapter.kind();
            match adapter.set(key, value) {
                Ok(()) => {
                    let mut fallback = None;
                    if i > 0 {
                        self.drop_stale_copies(&self.adapters[..i], key);
                        self.diagnostics.warn(
                            &format!("stored '{key}' in fallback backend {kind}"),
                            Some(json!({ "failures": failures })),
                        );
                        fallback = Some(json!({
                            "key": key,
                            "from": self.adapters[0].kind(),
                            "to": kind,
                            "failures": failures,
                        }));
                    }
                    return Ok(WriteReceipt { backend: kind, fallback });
                }
                Err(e) => {
                    self.diagnostics.debug(&format!("{kind} refused '{key}': {e}"), None);
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }

        self.diagnostics.error(
            &format!("every backend refused '{key}'"),
            Some(json!({ "failures": failures })),
        );
        Err(StoreError::AllBackendsFailed(failures))
    }

    fn drop_stale_copies(&self, failed: &[AdapterHandle], key: &str) {
        for adapter in failed {
            if let Err(e) = adapter.remove(key) {
                self.diagnostics
                    .debug(&format!("could not drop stale '{key}' from {}: {e}", adapter.kind()), None);
            }
        }
    }

    /// Reads `key` from the first adapter that holds it. Adapters that error
    /// are skipped.
    pub fn get(&self, key: &str) -> Option<(String, BackendKind)> {
        for adapter in &self.adapters {
            match adapter.get(key) {
                Ok(Some(value)) => return Some((value, adapter.kind())),
                Ok(None) => {}
                Err(e) => self
                    .diagnostics
                    .debug(&format!("{} unreadable for '{key}': {e}", adapter.kind()), None),
            }
        }
        None
    }

    /// Removes `key` from every adapter in the chain. Adapters that fail do not
    /// stop the others; the error names which media were cleared.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut cleared = Vec::new();
        let mut failures = Vec::new();
        for adapter in &self.adapters {
            match adapter.remove(key) {
                Ok(()) => cleared.push(adapter.kind().to_string()),
                Err(e) => failures.push(format!("{}: {e}", adapter.kind())),
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        self.diagnostics.warn(
            &format!("could not remove '{key}' everywhere"),
            Some(json!({ "cleared": cleared, "failures": failures })),
        );
        if cleared.is_empty() {
            Err(StoreError::AllBackendsFailed(failures))
        } else {
            Err(StoreError::PartiallyRemoved { cleared, failures })
        }
    }
}

/// Outcome of [`BackendManager::write`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub backend: BackendKind,
    /// `backend:fallback` payload when the write did not land in the primary.
    pub fallback: Option<Value>,
}

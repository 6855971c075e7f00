//! The [`LocaleStore`] facade.
//!
//! Wires the config, backends, stores and services together and exposes the
//! operations the rest of an application calls. Nothing here panics or returns
//! an error past the facade once the store is built: reads and writes return a
//! [`StorageOperationResult`], everything else a plain value with safe
//! defaults.
//!
//! ```rust
//! use locale_store::{DetectionSource, LocaleStore};
//!
//! let store = LocaleStore::builder().preset("test").build().unwrap();
//! store.record_detection_now("nl-BE", DetectionSource::Header, 0.8);
//! store.record_preference_now("fr-BE", DetectionSource::Manual);
//!
//! assert_eq!(store.get_detection_history().data.unwrap().history.len(), 1);
//! assert_eq!(store.get_preference_change_stats().total_changes, 1);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::analytics::{AnalyticsAggregator, ChangeStats};
use crate::backend::{
    AdapterHandle, BackendKind, BackendManager, BackendSet, CookieBackend, FileBackend, MemoryBackend, SessionStorage,
};
use crate::backup::{Backup, BackupManager};
use crate::clock::{ClockHandle, SystemClock};
use crate::codec::{CodecHandle, PassthroughCodec};
use crate::config::{ConfigManager, StorageConfig};
use crate::diagnostics::Diagnostics;
use crate::errors::StoreError;
use crate::events::{EventBus, ListenerId, StorageEvent, Subscription, CONFIG_UPDATED, MAX_EVENT_HISTORY};
use crate::health::{HealthChecker, HealthReport};
use crate::maintenance::{MaintenanceEngine, MaintenanceOptions, MaintenanceRecommendations, MaintenanceSummary, MaintenanceThresholds};
use crate::record::{DetectionRecord, DetectionSource, LocaleDetectionHistory, StorageOperationResult};
use crate::store::{RecordStore, StoreContext};
use crate::sync::{SyncManager, SyncTransport};

pub const LOCAL_STORAGE_FILE: &str = "local_storage.json";
pub const INDEXED_DB_FILE: &str = "indexed_db.sqlite";

#[derive(Default)]
pub struct LocaleStoreBuilder {
    config: Option<StorageConfig>,
    preset: Option<String>,
    from_env: bool,
    backends: BackendSet,
    data_dir: Option<PathBuf>,
    clock: Option<ClockHandle>,
    codec: Option<CodecHandle>,
    event_capacity: Option<usize>,
    thresholds: Option<MaintenanceThresholds>,
}

impl LocaleStoreBuilder {
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Starts from a named preset instead of the default config.
    pub fn preset(mut self, name: &str) -> Self {
        self.preset = Some(name.to_string());
        self
    }

    /// Reads the preset and overrides from `LOCALE_STORE_*` variables.
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    /// Registers an adapter. Which registered adapters are used, and in which
    /// order, follows `errorHandling.fallbackStorage`.
    pub fn backend(mut self, adapter: AdapterHandle) -> Self {
        self.backends.insert(adapter);
        self
    }

    /// Directory for the file (`localStorage`) and SQLite (`indexedDB`) backends.
    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn clock(mut self, clock: ClockHandle) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn codec(mut self, codec: CodecHandle) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn event_history_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    pub fn maintenance_thresholds(mut self, thresholds: MaintenanceThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Resolves the config and backends. Fails on an unknown preset, an invalid
    /// config or a data directory that cannot be opened.
    pub fn build(self) -> Result<LocaleStore, StoreError> {
        let config = match (self.config, self.preset, self.from_env) {
            (Some(config), _, _) => {
                let check = config.validate();
                if !check.valid {
                    return Err(StoreError::Validation(check.errors));
                }
                ConfigManager::new(config)
            }
            (None, _, true) => ConfigManager::from_env()?,
            (None, Some(name), false) => ConfigManager::from_preset(&name)?,
            (None, None, false) => ConfigManager::default(),
        };
        let config = Arc::new(config);
        let snapshot = config.snapshot();

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let diagnostics = Arc::new(Diagnostics::new(&snapshot, clock.clone()));
        let events = Arc::new(EventBus::with_capacity(
            self.event_capacity.unwrap_or(MAX_EVENT_HISTORY),
            clock.clone(),
            Some(diagnostics.clone()),
        ));

        let mut available = self.backends;
        if let Some(dir) = &self.data_dir {
            open_data_dir(&mut available, dir)?;
        }
        if !available.contains(BackendKind::Cookie) {
            available.insert(Arc::new(CookieBackend::new(clock.clone(), Some(snapshot.retention.preferences))));
        }
        if !available.contains(BackendKind::SessionStorage) {
            available.insert(Arc::new(SessionStorage::new().open()));
        }
        if !available.contains(BackendKind::Memory) {
            available.insert(Arc::new(MemoryBackend::new()));
        }

        let backends = Arc::new(
            BackendManager::from_config(&snapshot, &available, diagnostics.clone()).with_events(events.clone()),
        );
        diagnostics.info(
            "locale store ready",
            Some(json!({ "backends": backends.kinds(), "version": snapshot.version })),
        );

        let ctx = StoreContext {
            backends: backends.clone(),
            config: config.clone(),
            codec: self.codec.unwrap_or_else(|| Arc::new(PassthroughCodec)),
            events: events.clone(),
            diagnostics: diagnostics.clone(),
            clock: clock.clone(),
        };
        if ctx.codec.name() == "passthrough" && (snapshot.compression.enabled || snapshot.encryption.enabled) {
            diagnostics.warn("compression/encryption enabled but no codec installed; storing plain JSON", None);
        }

        let history = Arc::new(RecordStore::history(ctx.clone()));
        let preferences = Arc::new(RecordStore::preferences(ctx.clone()));

        let maintenance = MaintenanceEngine::new(history.clone(), preferences.clone(), events.clone(), clock.clone())
            .with_thresholds(self.thresholds.unwrap_or_default());
        let analytics = AnalyticsAggregator::new(
            history.clone(),
            preferences.clone(),
            events.clone(),
            config.clone(),
            clock.clone(),
        );
        let backup = BackupManager::new(history.clone(), preferences.clone(), events.clone(), clock.clone());
        let health = Arc::new(HealthChecker::new(
            backends.clone(),
            config.clone(),
            events.clone(),
            diagnostics.clone(),
            clock.clone(),
        ));

        Ok(LocaleStore {
            ctx,
            history,
            preferences,
            maintenance,
            analytics,
            backup,
            health,
        })
    }
}

fn open_data_dir(available: &mut BackendSet, dir: &Path) -> Result<(), StoreError> {
    if !available.contains(BackendKind::LocalStorage) {
        let file = FileBackend::new(dir.join(LOCAL_STORAGE_FILE)).map_err(|e| unavailable(BackendKind::LocalStorage, e))?;
        available.insert(Arc::new(file));
    }
    open_indexed_db(available, dir)
}

#[cfg(feature = "sqlite_backend")]
fn open_indexed_db(available: &mut BackendSet, dir: &Path) -> Result<(), StoreError> {
    if !available.contains(BackendKind::IndexedDb) {
        let path = dir.join(INDEXED_DB_FILE);
        let db = crate::backend::SqliteBackend::new(&path.to_string_lossy())
            .map_err(|e| unavailable(BackendKind::IndexedDb, e))?;
        available.insert(Arc::new(db));
    }
    Ok(())
}

#[cfg(not(feature = "sqlite_backend"))]
fn open_indexed_db(_available: &mut BackendSet, _dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

fn unavailable(kind: BackendKind, e: anyhow::Error) -> StoreError {
    StoreError::BackendUnavailable(format!("{kind}: {e:#}"))
}

pub struct LocaleStore {
    ctx: StoreContext,
    history: Arc<RecordStore>,
    preferences: Arc<RecordStore>,
    maintenance: MaintenanceEngine,
    analytics: AnalyticsAggregator,
    backup: BackupManager,
    health: Arc<HealthChecker>,
}

impl LocaleStore {
    pub fn builder() -> LocaleStoreBuilder {
        LocaleStoreBuilder::default()
    }

    pub fn config(&self) -> Arc<StorageConfig> {
        self.ctx.config.snapshot()
    }

    pub fn backends(&self) -> Vec<BackendKind> {
        self.ctx.backends.kinds()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.ctx.diagnostics
    }

    // detections

    pub fn get_detection_history(&self) -> StorageOperationResult<LocaleDetectionHistory> {
        self.history.read()
    }

    pub fn record_detection(&self, record: DetectionRecord) -> StorageOperationResult<LocaleDetectionHistory> {
        self.history.append(record)
    }

    /// Records a detection stamped with the store clock.
    pub fn record_detection_now(
        &self,
        locale: &str,
        source: DetectionSource,
        confidence: f64,
    ) -> StorageOperationResult<LocaleDetectionHistory> {
        self.record_detection(DetectionRecord::new(locale, source, confidence, self.ctx.clock.now_ms()))
    }

    pub fn clear_history(&self) -> StorageOperationResult<()> {
        self.history.clear()
    }

    // preferences

    pub fn get_preference_history(&self) -> StorageOperationResult<LocaleDetectionHistory> {
        self.preferences.read()
    }

    pub fn record_preference(&self, record: DetectionRecord) -> StorageOperationResult<LocaleDetectionHistory> {
        self.preferences.append(record)
    }

    /// Records an explicit choice with full confidence, stamped with the store clock.
    pub fn record_preference_now(
        &self,
        locale: &str,
        source: DetectionSource,
    ) -> StorageOperationResult<LocaleDetectionHistory> {
        self.record_preference(DetectionRecord::new(locale, source, 1.0, self.ctx.clock.now_ms()))
    }

    pub fn clear_preferences(&self) -> StorageOperationResult<()> {
        self.preferences.clear()
    }

    // analytics

    pub fn get_preference_change_stats(&self) -> ChangeStats {
        self.analytics.get_preference_change_stats()
    }

    pub fn get_history_stats(&self) -> ChangeStats {
        self.analytics.get_history_stats()
    }

    pub fn export_analytics_data(&self) -> Value {
        self.analytics.export_analytics_data()
    }

    // backup

    pub fn create_backup(&self) -> StorageOperationResult<Backup> {
        self.backup.create_backup()
    }

    pub fn restore_from_backup(&self, backup: &Value) -> StorageOperationResult<LocaleDetectionHistory> {
        self.backup.restore_from_backup(backup)
    }

    pub fn export_history_as_json(&self) -> StorageOperationResult<String> {
        self.backup.export_history_as_json()
    }

    pub fn import_history_from_json(&self, text: &str) -> StorageOperationResult<LocaleDetectionHistory> {
        self.backup.import_history_from_json(text)
    }

    pub fn create_download_payload(&self) -> Value {
        self.backup.create_download_payload()
    }

    // maintenance

    pub fn perform_maintenance(&self, options: &MaintenanceOptions) -> StorageOperationResult<MaintenanceSummary> {
        let now = self.ctx.clock.now_ms();
        match self.maintenance.perform_maintenance(options) {
            Ok(summary) => StorageOperationResult::ok(summary, None, now),
            Err(e) => {
                self.ctx.diagnostics.error(&format!("maintenance failed: {e}"), None);
                StorageOperationResult::failed(e, None, now)
            }
        }
    }

    pub fn get_maintenance_recommendations(&self) -> MaintenanceRecommendations {
        self.maintenance.get_maintenance_recommendations()
    }

    // health

    pub fn perform_health_check(&self) -> HealthReport {
        self.health.perform_health_check()
    }

    pub fn health_checker(&self) -> Arc<HealthChecker> {
        self.health.clone()
    }

    // sync

    /// A sync manager for the detection history over `transport`.
    pub fn sync_manager<T: SyncTransport>(&self, transport: T) -> SyncManager<T> {
        SyncManager::new(
            transport,
            self.history.clone(),
            self.ctx.config.clone(),
            self.ctx.events.clone(),
            self.ctx.diagnostics.clone(),
            self.ctx.clock.clone(),
        )
    }

    // config

    /// Merges `partial` over the active config. Nothing changes unless the
    /// merged config validates. The backend chain is fixed at build time and
    /// is not rebuilt.
    pub fn update_config(&self, partial: &Value) -> StorageOperationResult<Arc<StorageConfig>> {
        let now = self.ctx.clock.now_ms();
        match self.ctx.config.update_config(partial) {
            Ok(config) => {
                self.ctx.diagnostics.apply_config(&config);
                self.history.invalidate_cache();
                self.preferences.invalidate_cache();
                self.ctx.events.emit(CONFIG_UPDATED, json!({ "changes": partial }));
                StorageOperationResult::ok(config, None, now)
            }
            Err(e) => {
                self.ctx.diagnostics.warn(&format!("config update rejected: {e}"), None);
                StorageOperationResult::failed(e, None, now)
            }
        }
    }

    // events

    pub fn add_event_listener<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.ctx.events.add_event_listener(event_type, listener)
    }

    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.ctx.events.remove_event_listener(event_type, id)
    }

    pub fn remove_all_listeners(&self, event_type: Option<&str>) {
        self.ctx.events.remove_all_listeners(event_type)
    }

    pub fn get_event_history(&self, limit: Option<usize>) -> Vec<StorageEvent> {
        self.ctx.events.get_event_history(limit)
    }

    /// Receiver for events on another task, such as a second "tab".
    pub fn subscribe(&self) -> Subscription {
        self.ctx.events.subscribe()
    }
}

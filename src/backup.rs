//! Backup, restore, JSON export and import of the detection history.
//!
//! Incoming data is validated as raw JSON before anything is written, so a
//! rejected import or restore leaves the stored history exactly as it was.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clock::ClockHandle;
use crate::errors::StoreError;
use crate::events::{EventBus, BACKUP_CREATED, BACKUP_RESTORED, STORAGE_ERROR};
use crate::record::{validate_history_data, LocaleDetectionHistory, StorageOperationResult};
use crate::store::RecordStore;

/// A point-in-time copy of the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup: LocaleDetectionHistory,
    pub timestamp: i64,
    /// Byte length of the serialized `backup`.
    pub size: usize,
}

pub struct BackupManager {
    history: Arc<RecordStore>,
    preferences: Arc<RecordStore>,
    events: Arc<EventBus>,
    clock: ClockHandle,
}

impl BackupManager {
    pub fn new(
        history: Arc<RecordStore>,
        preferences: Arc<RecordStore>,
        events: Arc<EventBus>,
        clock: ClockHandle,
    ) -> Self {
        Self {
            history,
            preferences,
            events,
            clock,
        }
    }

    pub fn create_backup(&self) -> StorageOperationResult<Backup> {
        let now = self.clock.now_ms();
        let read = self.history.read();
        let source = read.source;
        let current = match read.into_result() {
            Ok(h) => h,
            Err(e) => return StorageOperationResult::failed(e, source, now),
        };
        match serde_json::to_string(&current) {
            Ok(serialized) => {
                let backup = Backup {
                    size: serialized.len(),
                    backup: current,
                    timestamp: now,
                };
                self.events.emit(
                    BACKUP_CREATED,
                    json!({ "count": backup.backup.history.len(), "size": backup.size }),
                );
                StorageOperationResult::ok(backup, source, now)
            }
            Err(e) => StorageOperationResult::failed(StoreError::from(e), source, now),
        }
    }

    /// Restores from either a [`Backup`] envelope or a bare history document.
    pub fn restore_from_backup(&self, backup: &Value) -> StorageOperationResult<LocaleDetectionHistory> {
        let doc = match backup.get("backup") {
            Some(inner) if inner.is_object() => inner,
            _ => backup,
        };
        self.accept(doc, BACKUP_RESTORED)
    }

    pub fn export_history_as_json(&self) -> StorageOperationResult<String> {
        let now = self.clock.now_ms();
        let read = self.history.read();
        let source = read.source;
        match read.into_result() {
            Ok(h) => match serde_json::to_string_pretty(&h) {
                Ok(text) => StorageOperationResult::ok(text, source, now),
                Err(e) => StorageOperationResult::failed(StoreError::from(e), source, now),
            },
            Err(e) => StorageOperationResult::failed(e, source, now),
        }
    }

    pub fn import_history_from_json(&self, text: &str) -> StorageOperationResult<LocaleDetectionHistory> {
        match serde_json::from_str::<Value>(text) {
            Ok(doc) => self.accept(&doc, self.history.kind().imported_event()),
            Err(e) => self.reject("import", StoreError::from(e)),
        }
    }

    /// `{current, historical, timestamp}`: the latest explicit preference (or
    /// `null`) and the full detection history, for a user-facing download.
    pub fn create_download_payload(&self) -> Value {
        json!({
            "current": self.preferences.get_all().last(),
            "historical": self.history.get_all(),
            "timestamp": self.clock.now_ms(),
        })
    }

    fn accept(&self, doc: &Value, event: &str) -> StorageOperationResult<LocaleDetectionHistory> {
        let check = validate_history_data(doc);
        if !check.valid {
            return self.reject("restore", StoreError::Validation(check.errors));
        }
        match serde_json::from_value::<LocaleDetectionHistory>(doc.clone()) {
            Ok(history) => self.history.replace(history, event),
            Err(e) => self.reject("restore", StoreError::from(e)),
        }
    }

    fn reject(&self, operation: &str, err: StoreError) -> StorageOperationResult<LocaleDetectionHistory> {
        log::warn!(target: "locale_store", "{operation} rejected: {err}");
        self.events.emit(
            STORAGE_ERROR,
            json!({ "operation": operation, "error": err.to_string() }),
        );
        StorageOperationResult::failed(err, None, self.clock.now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::record::{DetectionRecord, DetectionSource};
    use crate::store::testing::Fixture;

    fn setup() -> (Fixture, BackupManager, Arc<RecordStore>, Arc<RecordStore>) {
        let fx = Fixture::with_max_entries(100);
        let history = Arc::new(RecordStore::history(fx.ctx.clone()));
        let prefs = Arc::new(RecordStore::preferences(fx.ctx.clone()));
        let manager = BackupManager::new(history.clone(), prefs.clone(), fx.ctx.events.clone(), fx.ctx.clock.clone());
        (fx, manager, history, prefs)
    }

    fn seed(history: &RecordStore) {
        history.append(DetectionRecord::new("en", DetectionSource::Header, 0.7, 1));
        history.append(DetectionRecord::new("fr", DetectionSource::Cookie, 0.9, 2));
    }

    #[test]
    fn export_import_round_trip_keeps_records_and_advances_stamp() {
        let (fx, manager, history, _) = setup();
        seed(&history);
        let before = history.read().data.unwrap();

        let text = manager.export_history_as_json().data.unwrap();
        fx.clock.advance(5_000);
        let res = manager.import_history_from_json(&text);
        assert!(res.success);

        let after = history.read().data.unwrap();
        assert_eq!(after.history, before.history);
        assert_eq!(after.last_updated, before.last_updated + 5_000);
    }

    #[test]
    fn restore_with_missing_timestamp_fails_and_keeps_history() {
        let (_fx, manager, history, _) = setup();
        seed(&history);
        let before = history.get_all();

        let bad = json!({
            "history": [
                { "locale": "de", "source": "url", "confidence": 0.5, "timestamp": 3 },
                { "locale": "nl", "source": "url", "confidence": 0.5 }
            ],
            "lastUpdated": 3
        });
        let res = manager.restore_from_backup(&bad);
        assert!(!res.success);
        assert!(res.error.unwrap().contains("history[1].timestamp"));
        assert_eq!(history.get_all(), before);
    }

    #[test]
    fn backup_then_restore_envelope() {
        let (_fx, manager, history, _) = setup();
        seed(&history);
        let backup = manager.create_backup().data.unwrap();
        assert_eq!(backup.size, serde_json::to_string(&backup.backup).unwrap().len());

        history.clear();
        assert!(history.get_all().is_empty());

        let envelope = serde_json::to_value(&backup).unwrap();
        assert!(manager.restore_from_backup(&envelope).success);
        assert_eq!(history.get_all(), backup.backup.history);
    }

    #[test]
    fn malformed_json_import_is_a_failed_result() {
        let (_fx, manager, history, _) = setup();
        seed(&history);
        let res = manager.import_history_from_json("{ not json");
        assert!(!res.success);
        assert!(res.error.unwrap().starts_with("Serialization error"));
        assert_eq!(history.get_all().len(), 2);
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let (_fx, manager, _, _) = setup();
        let bad = json!({
            "history": [{ "locale": "de", "source": "url", "confidence": 1.2, "timestamp": 3 }],
            "lastUpdated": 3
        });
        assert!(!manager.restore_from_backup(&bad).success);
    }

    #[test]
    fn download_payload_shape() {
        let (fx, manager, history, prefs) = setup();
        let empty = manager.create_download_payload();
        assert!(empty["current"].is_null());

        seed(&history);
        prefs.append(DetectionRecord::new("es", DetectionSource::Manual, 1.0, 10));
        let payload = manager.create_download_payload();
        assert_eq!(payload["current"]["locale"], "es");
        assert_eq!(payload["historical"].as_array().unwrap().len(), 2);
        assert_eq!(payload["timestamp"], fx.clock.now_ms());
    }
}

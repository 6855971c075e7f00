//! Cleanup of the record stores and recommendations about when to run it.
//!
//! A maintenance run applies three phases to each list, in order:
//!
//! 1. **expire** records older than `now - max_age`, where `max_age` is the
//!    store's `retention.history` / `retention.preferences` unless the run
//!    names one; a retention of zero disables expiry
//! 2. **dedupe** records sharing `locale|source|timestamp`, keeping the first
//! 3. **truncate** from the oldest end until the size bound holds
//!
//! The phases are plain functions over a `Vec<DetectionRecord>`; the engine
//! only loads, applies and persists. A list is rewritten only when a phase
//! changed it, so a second run without new writes reports zero everywhere.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::clock::ClockHandle;
use crate::errors::StoreError;
use crate::events::{EventBus, MAINTENANCE_COMPLETED};
use crate::record::{record_violations, DetectionRecord};
use crate::store::{enforce_size, RecordStore};

/// Heuristic thresholds. The defaults are the long-standing values; callers
/// may override them per engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceThresholds {
    /// A list longer than `overflow_factor × max` is urgent.
    pub overflow_factor: f64,
}

impl Default for MaintenanceThresholds {
    fn default() -> Self {
        Self { overflow_factor: 1.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceOptions {
    /// Overrides the store's configured retention for this run.
    pub max_age_ms: Option<u64>,
    pub remove_expired: bool,
    pub remove_duplicates: bool,
    pub enforce_size_limit: bool,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self {
            max_age_ms: None,
            remove_expired: true,
            remove_duplicates: true,
            enforce_size_limit: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_removed: usize,
    pub duplicates_removed: usize,
    pub size_reduced: usize,
    pub final_count: usize,
}

impl MaintenanceReport {
    pub fn removed(&self) -> usize {
        self.expired_removed + self.duplicates_removed + self.size_reduced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub history: MaintenanceReport,
    pub preferences: MaintenanceReport,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAssessment {
    pub store: &'static str,
    pub urgency: Urgency,
    pub record_count: usize,
    pub max_records: usize,
    pub expired_count: usize,
    pub duplicate_count: usize,
    pub invalid_count: usize,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRecommendations {
    /// The most urgent of the per-store assessments.
    pub urgency: Urgency,
    pub stores: Vec<StoreAssessment>,
}

/// Removes records with `timestamp < now - max_age_ms`.
pub fn expire(records: &mut Vec<DetectionRecord>, now: i64, max_age_ms: u64) -> usize {
    let cutoff = now.saturating_sub(max_age_ms as i64);
    let before = records.len();
    records.retain(|r| r.timestamp >= cutoff);
    before - records.len()
}

/// Removes later records whose identity was already seen.
pub fn dedupe(records: &mut Vec<DetectionRecord>) -> usize {
    let mut seen = HashSet::new();
    let before = records.len();
    records.retain(|r| seen.insert(r.identity()));
    before - records.len()
}

pub fn truncate(records: &mut Vec<DetectionRecord>, max: usize) -> usize {
    enforce_size(records, max)
}

/// Runs the enabled phases over `records`. Expiry is skipped when
/// `max_age_ms` is `None`.
pub fn run_phases(
    records: &mut Vec<DetectionRecord>,
    now: i64,
    max: usize,
    max_age_ms: Option<u64>,
    options: &MaintenanceOptions,
) -> MaintenanceReport {
    let expired_removed = match max_age_ms {
        Some(age) if options.remove_expired => expire(records, now, age),
        _ => 0,
    };
    let duplicates_removed = if options.remove_duplicates { dedupe(records) } else { 0 };
    let size_reduced = if options.enforce_size_limit {
        truncate(records, max)
    } else {
        0
    };
    MaintenanceReport {
        expired_removed,
        duplicates_removed,
        size_reduced,
        final_count: records.len(),
    }
}

/// Grades one list without touching it.
///
/// `raw` is the persisted document when available; it is checked record by
/// record so that malformed entries count as invalid even when they would not
/// decode into a [`DetectionRecord`].
pub fn assess(
    store: &'static str,
    records: &[DetectionRecord],
    raw: Option<&Value>,
    now: i64,
    max: usize,
    max_age_ms: Option<u64>,
    thresholds: &MaintenanceThresholds,
) -> StoreAssessment {
    let invalid_count = match raw.and_then(|v| v.get("history")).and_then(Value::as_array) {
        Some(raw_records) => raw_records
            .iter()
            .enumerate()
            .filter(|(i, r)| !record_violations(*i, r).is_empty())
            .count(),
        None => records.iter().filter(|r| !r.is_valid()).count(),
    };
    let record_count = raw
        .and_then(|v| v.get("history"))
        .and_then(Value::as_array)
        .map_or(records.len(), Vec::len);

    let expired_count = max_age_ms.map_or(0, |age| expire(&mut records.to_vec(), now, age));
    let duplicate_count = dedupe(&mut records.to_vec());

    let mut actions = Vec::new();
    if invalid_count > 0 {
        actions.push(format!("repair or drop {invalid_count} invalid record(s)"));
    }
    if record_count > max {
        actions.push(format!("truncate {} record(s) over the limit of {max}", record_count - max));
    }
    if expired_count > 0 {
        actions.push(format!("remove {expired_count} expired record(s)"));
    }
    if duplicate_count > 0 {
        actions.push(format!("remove {duplicate_count} duplicate record(s)"));
    }

    let urgency = if record_count as f64 > thresholds.overflow_factor * max as f64 || invalid_count > 0 {
        Urgency::High
    } else if record_count > max || expired_count > 0 || duplicate_count > 0 {
        Urgency::Medium
    } else {
        Urgency::Low
    };

    StoreAssessment {
        store,
        urgency,
        record_count,
        max_records: max,
        expired_count,
        duplicate_count,
        invalid_count,
        actions,
    }
}

/// Runs maintenance over the history and preference stores.
pub struct MaintenanceEngine {
    history: Arc<RecordStore>,
    preferences: Arc<RecordStore>,
    events: Arc<EventBus>,
    clock: ClockHandle,
    thresholds: MaintenanceThresholds,
}

impl MaintenanceEngine {
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
            thresholds: MaintenanceThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: MaintenanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> MaintenanceThresholds {
        self.thresholds
    }

    pub fn perform_maintenance(&self, options: &MaintenanceOptions) -> Result<MaintenanceSummary, StoreError> {
        let history = self.maintain(&self.history, options)?;
        let preferences = self.maintain(&self.preferences, options)?;
        let summary = MaintenanceSummary {
            history,
            preferences,
            timestamp: self.clock.now_ms(),
        };
        self.events.emit(
            MAINTENANCE_COMPLETED,
            serde_json::to_value(&summary).unwrap_or_else(|_| json!({})),
        );
        Ok(summary)
    }

    fn maintain(&self, store: &RecordStore, options: &MaintenanceOptions) -> Result<MaintenanceReport, StoreError> {
        let now = self.clock.now_ms();
        let max = store.max_records();
        let max_age = options.max_age_ms.or_else(|| retention(store));
        store.update(store.kind().written_event(), |records| {
            let report = run_phases(records, now, max, max_age, options);
            (report.removed() > 0, report)
        })
    }

    pub fn get_maintenance_recommendations(&self) -> MaintenanceRecommendations {
        let now = self.clock.now_ms();
        let stores: Vec<StoreAssessment> = [&self.history, &self.preferences]
            .into_iter()
            .map(|store| {
                let raw = store.read_raw();
                assess(
                    store.kind().label(),
                    &store.get_all(),
                    raw.as_ref(),
                    now,
                    store.max_records(),
                    retention(store),
                    &self.thresholds,
                )
            })
            .collect();
        let urgency = stores.iter().map(|s| s.urgency).max().unwrap_or(Urgency::Low);
        MaintenanceRecommendations { urgency, stores }
    }
}

/// The store's configured retention; zero means records never expire.
fn retention(store: &RecordStore) -> Option<u64> {
    Some(store.retention_ms()).filter(|&ms| ms > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, DAY_MS};
    use crate::config::StorageConfig;
    use crate::record::{DetectionSource, LocaleDetectionHistory};
    use crate::store::testing::Fixture;
    use crate::store::HISTORY_KEY;

    fn rec(locale: &str, source: DetectionSource, ts: i64) -> DetectionRecord {
        DetectionRecord::new(locale, source, 0.9, ts)
    }

    fn engine(fx: &Fixture) -> (MaintenanceEngine, Arc<RecordStore>) {
        let history = Arc::new(RecordStore::history(fx.ctx.clone()));
        let prefs = Arc::new(RecordStore::preferences(fx.ctx.clone()));
        let engine = MaintenanceEngine::new(history.clone(), prefs, fx.ctx.events.clone(), fx.ctx.clock.clone());
        (engine, history)
    }

    #[test]
    fn phases_count_what_they_remove() {
        let now = 100 * DAY_MS;
        let mut records = vec![
            rec("en", DetectionSource::Cookie, now - 40 * DAY_MS),
            rec("fr", DetectionSource::Header, now - DAY_MS),
            rec("fr", DetectionSource::Header, now - DAY_MS),
            rec("de", DetectionSource::Url, now - 2),
            rec("nl", DetectionSource::Url, now - 1),
        ];
        let report = run_phases(
            &mut records,
            now,
            2,
            Some(30 * DAY_MS as u64),
            &MaintenanceOptions::default(),
        );
        assert_eq!(
            report,
            MaintenanceReport {
                expired_removed: 1,
                duplicates_removed: 1,
                size_reduced: 1,
                final_count: 2,
            }
        );
        assert_eq!(records[0].locale, "de");
    }

    #[test]
    fn dedupe_keeps_first_in_stored_order() {
        let mut first = rec("en", DetectionSource::Cookie, 5);
        first.confidence = 0.1;
        let mut records = vec![first.clone(), rec("en", DetectionSource::Cookie, 5)];
        assert_eq!(dedupe(&mut records), 1);
        assert_eq!(records, vec![first]);
    }

    #[test]
    fn identical_records_collapse_after_maintenance() {
        let fx = Fixture::with_max_entries(100);
        let (engine, history) = engine(&fx);
        let ts = 1_700_000_000_000;
        fx.clock.set(ts);
        history.append(rec("en", DetectionSource::Cookie, ts));
        history.append(rec("en", DetectionSource::Cookie, ts));
        assert_eq!(history.get_all().len(), 2);

        let summary = engine.perform_maintenance(&MaintenanceOptions::default()).unwrap();
        assert_eq!(summary.history.duplicates_removed, 1);
        assert_eq!(history.get_all().len(), 1);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let fx = Fixture::with_max_entries(100);
        let (engine, history) = engine(&fx);
        let now = fx.clock.now_ms();
        history.append(rec("en", DetectionSource::Cookie, now - 60 * DAY_MS));
        history.append(rec("en", DetectionSource::Header, now));
        history.append(rec("en", DetectionSource::Header, now));

        let first = engine.perform_maintenance(&MaintenanceOptions::default()).unwrap();
        assert_eq!(first.history.removed(), 2);
        let second = engine.perform_maintenance(&MaintenanceOptions::default()).unwrap();
        assert_eq!(second.history.removed(), 0);
        assert_eq!(second.preferences.removed(), 0);
        assert_eq!(second.history.final_count, 1);
    }

    #[test]
    fn recommendations_grade_urgency() {
        let t = MaintenanceThresholds::default();
        let month = Some(30 * DAY_MS as u64);
        let now = 1_000 * DAY_MS;
        let fresh: Vec<_> = (0..4).map(|i| rec("en", DetectionSource::Url, now - i)).collect();

        assert_eq!(assess("history", &fresh, None, now, 10, month, &t).urgency, Urgency::Low);
        assert_eq!(assess("history", &fresh, None, now, 3, month, &t).urgency, Urgency::Medium);
        assert_eq!(assess("history", &fresh, None, now, 2, month, &t).urgency, Urgency::High);

        let mut stale = fresh.clone();
        stale.push(rec("en", DetectionSource::Url, now - 31 * DAY_MS));
        let a = assess("history", &stale, None, now, 10, month, &t);
        assert_eq!((a.urgency, a.expired_count), (Urgency::Medium, 1));
        let a = assess("history", &stale, None, now, 10, None, &t);
        assert_eq!((a.urgency, a.expired_count), (Urgency::Low, 0));
    }

    #[test]
    fn malformed_persisted_record_is_high_urgency() {
        let fx = Fixture::new(StorageConfig::default(), vec![]);
        let (engine, _) = engine(&fx);
        let doc = json!({
            "history": [{ "locale": "en", "source": "cookie", "confidence": 0.5 }],
            "lastUpdated": 1
        });
        fx.ctx.backends.set(HISTORY_KEY, &doc.to_string()).unwrap();

        let recs = engine.get_maintenance_recommendations();
        assert_eq!(recs.urgency, Urgency::High);
        assert_eq!(recs.stores[0].invalid_count, 1);
        // read-only
        assert_eq!(fx.ctx.backends.get(HISTORY_KEY).unwrap().0, doc.to_string());
    }

    #[test]
    fn custom_thresholds_change_the_grade() {
        let now = 0;
        let records: Vec<_> = (0..4).map(|i| rec("en", DetectionSource::Url, now - i)).collect();
        let lenient = MaintenanceThresholds { overflow_factor: 3.0 };
        assert_eq!(assess("history", &records, None, now, 2, None, &lenient).urgency, Urgency::Medium);
    }

    #[test]
    fn maintenance_emits_completion_event() {
        let fx = Fixture::with_max_entries(10);
        let (engine, history) = engine(&fx);
        history.replace(
            LocaleDetectionHistory::new(vec![rec("en", DetectionSource::Url, fx.clock.now_ms())], 0),
            crate::events::HISTORY_IMPORTED,
        );
        engine.perform_maintenance(&MaintenanceOptions::default()).unwrap();
        let last = fx.ctx.events.get_event_history(Some(1));
        assert_eq!(last[0].event_type, MAINTENANCE_COMPLETED);
        assert_eq!(last[0].payload["history"]["finalCount"], 1);
    }

    #[test]
    fn expiry_follows_each_store_retention() {
        let mut config = StorageConfig::default();
        config.retention.history = 7 * DAY_MS as u64;
        config.retention.preferences = 365 * DAY_MS as u64;
        let fx = Fixture::new(config, vec![]);
        let history = Arc::new(RecordStore::history(fx.ctx.clone()));
        let prefs = Arc::new(RecordStore::preferences(fx.ctx.clone()));
        let engine = MaintenanceEngine::new(history.clone(), prefs.clone(), fx.ctx.events.clone(), fx.ctx.clock.clone());

        let now = fx.clock.now_ms();
        history.append(rec("en", DetectionSource::Header, now - 10 * DAY_MS));
        history.append(rec("en", DetectionSource::Header, now - DAY_MS));
        prefs.append(rec("fr", DetectionSource::Manual, now - 90 * DAY_MS));

        let recs = engine.get_maintenance_recommendations();
        assert_eq!(recs.stores[0].expired_count, 1);
        assert_eq!(recs.stores[1].expired_count, 0);

        let summary = engine.perform_maintenance(&MaintenanceOptions::default()).unwrap();
        assert_eq!(summary.history.expired_removed, 1);
        assert_eq!(summary.history.final_count, 1);
        assert_eq!(summary.preferences.expired_removed, 0);
        assert_eq!(prefs.get_all().len(), 1);
    }

    #[test]
    fn explicit_max_age_beats_retention_and_zero_retention_keeps_everything() {
        let mut config = StorageConfig::default();
        config.retention.history = 0;
        let fx = Fixture::new(config, vec![]);
        let (engine, history) = engine(&fx);
        let now = fx.clock.now_ms();
        history.append(rec("en", DetectionSource::Header, now - 400 * DAY_MS));
        history.append(rec("en", DetectionSource::Header, now - 2 * DAY_MS));

        let kept = engine.perform_maintenance(&MaintenanceOptions::default()).unwrap();
        assert_eq!(kept.history.expired_removed, 0);

        let options = MaintenanceOptions {
            max_age_ms: Some(DAY_MS as u64),
            ..Default::default()
        };
        let trimmed = engine.perform_maintenance(&options).unwrap();
        assert_eq!(trimmed.history.expired_removed, 2);
        assert!(history.get_all().is_empty());
    }
}

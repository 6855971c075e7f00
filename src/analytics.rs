//! Usage statistics derived from the record stores.
//!
//! Everything here is a pure function of the current record list: nothing is
//! cached and nothing is written back.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::clock::{format_ms, ClockHandle, DAY_MS};
use crate::config::ConfigManager;
use crate::events::EventBus;
use crate::record::DetectionRecord;
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStats {
    pub total_changes: usize,
    pub locale_counts: BTreeMap<String, usize>,
    pub source_counts: BTreeMap<String, usize>,
    pub average_confidence: f64,
    pub most_common_locale: Option<String>,
    pub last_change: Option<i64>,
    /// Records per day over the span between the oldest and newest record.
    pub change_frequency: f64,
}

pub fn compute_stats(records: &[DetectionRecord]) -> ChangeStats {
    let mut locale_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut source_counts: BTreeMap<String, usize> = BTreeMap::new();
    for r in records {
        *locale_counts.entry(r.locale.clone()).or_default() += 1;
        *source_counts.entry(r.source.as_str().to_string()).or_default() += 1;
    }

    let average_confidence = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64
    };

    // ties go to the alphabetically first locale
    let most_common_locale = locale_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(l, _)| l.clone());

    ChangeStats {
        total_changes: records.len(),
        locale_counts,
        source_counts,
        average_confidence,
        most_common_locale,
        last_change: records.iter().map(|r| r.timestamp).max(),
        change_frequency: change_frequency(records),
    }
}

pub fn change_frequency(records: &[DetectionRecord]) -> f64 {
    let (Some(oldest), Some(newest)) = (
        records.iter().map(|r| r.timestamp).min(),
        records.iter().map(|r| r.timestamp).max(),
    ) else {
        return 0.0;
    };
    let span = newest - oldest;
    if records.len() <= 1 || span <= 0 {
        return 0.0;
    }
    records.len() as f64 / (span as f64 / DAY_MS as f64)
}

pub struct AnalyticsAggregator {
    history: Arc<RecordStore>,
    preferences: Arc<RecordStore>,
    events: Arc<EventBus>,
    config: Arc<ConfigManager>,
    clock: ClockHandle,
}

impl AnalyticsAggregator {
    pub fn new(
        history: Arc<RecordStore>,
        preferences: Arc<RecordStore>,
        events: Arc<EventBus>,
        config: Arc<ConfigManager>,
        clock: ClockHandle,
    ) -> Self {
        Self {
            history,
            preferences,
            events,
            config,
            clock,
        }
    }

    pub fn get_history_stats(&self) -> ChangeStats {
        compute_stats(&self.history.get_all())
    }

    pub fn get_preference_change_stats(&self) -> ChangeStats {
        compute_stats(&self.preferences.get_all())
    }

    /// Snapshot for external analytics. Only records inside
    /// `retention.analytics` are included.
    pub fn export_analytics_data(&self) -> Value {
        let now = self.clock.now_ms();
        let window = self.config.snapshot().retention.analytics;
        let cutoff = now.saturating_sub(window as i64);
        let within = |records: Vec<DetectionRecord>| -> Vec<DetectionRecord> {
            records.into_iter().filter(|r| r.timestamp >= cutoff).collect()
        };

        let mut event_counts: BTreeMap<String, usize> = BTreeMap::new();
        for ev in self.events.get_event_history(None) {
            *event_counts.entry(ev.event_type).or_default() += 1;
        }

        json!({
            "history": compute_stats(&within(self.history.get_all())),
            "preferences": compute_stats(&within(self.preferences.get_all())),
            "events": event_counts,
            "windowMs": window,
            "exportedAt": now,
            "exportedAtIso": format_ms(now),
        })
    }
}

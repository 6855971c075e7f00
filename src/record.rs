//! Record types persisted by the stores.
//!
//! - [`DetectionRecord`]: one observation of which locale applies, how it was
//!   found and how confident the detector was.
//! - [`LocaleDetectionHistory`]: the aggregate stored as a single JSON blob per key.
//! - [`StorageOperationResult`]: the envelope every public read/write returns.
//!
//! Preference records share the [`DetectionRecord`] shape; they live under a
//! different key so detections never overwrite explicit user choices.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendKind;
use crate::config::schema::{ValidationResult, Violation};

/// How a locale was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionSource {
    Cookie,
    Header,
    #[serde(rename = "geoIP")]
    GeoIp,
    Manual,
    Url,
    Browser,
    Default,
}

impl DetectionSource {
    pub const ALL: [DetectionSource; 7] = [
        DetectionSource::Cookie,
        DetectionSource::Header,
        DetectionSource::GeoIp,
        DetectionSource::Manual,
        DetectionSource::Url,
        DetectionSource::Browser,
        DetectionSource::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Cookie => "cookie",
            DetectionSource::Header => "header",
            DetectionSource::GeoIp => "geoIP",
            DetectionSource::Manual => "manual",
            DetectionSource::Url => "url",
            DetectionSource::Browser => "browser",
            DetectionSource::Default => "default",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|src| src.as_str() == s)
    }
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inferred-locale (or explicit preference) event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub locale: String,
    pub source: DetectionSource,
    pub confidence: f64,
    pub timestamp: i64,
}

impl DetectionRecord {
    pub fn new<S: Into<String>>(locale: S, source: DetectionSource, confidence: f64, timestamp: i64) -> Self {
        Self {
            locale: locale.into(),
            source,
            confidence,
            timestamp,
        }
    }

    /// Deduplication identity: `locale|source|timestamp`.
    pub fn identity(&self) -> String {
        format!("{}|{}|{}", self.locale, self.source, self.timestamp)
    }

    /// Checks the structural invariants of an already-typed record.
    pub fn violations(&self, index: usize) -> Vec<Violation> {
        let mut out = Vec::new();
        if self.locale.trim().is_empty() {
            out.push(Violation::new(format!("history[{index}].locale"), "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            out.push(Violation::new(
                format!("history[{index}].confidence"),
                format!("{} is outside [0, 1]", self.confidence),
            ));
        }
        if self.timestamp < 0 {
            out.push(Violation::new(format!("history[{index}].timestamp"), "must not be negative"));
        }
        out
    }

    pub fn is_valid(&self) -> bool {
        self.violations(0).is_empty()
    }
}

/// Preference records are structurally identical to detections.
pub type PreferenceRecord = DetectionRecord;

/// The serializable aggregate persisted under one storage key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleDetectionHistory {
    pub history: Vec<DetectionRecord>,
    pub last_updated: i64,
}

impl LocaleDetectionHistory {
    pub fn new(history: Vec<DetectionRecord>, last_updated: i64) -> Self {
        Self { history, last_updated }
    }

    /// Advances `last_updated` to `now` without ever moving it backwards.
    pub fn touch(&mut self, now: i64) {
        self.last_updated = self.last_updated.max(now);
    }
}

/// Validates the raw JSON shape of a [`LocaleDetectionHistory`] before it is
/// accepted by an import or restore.
pub fn validate_history_data(value: &Value) -> ValidationResult {
    let mut errors = Vec::new();

    let Some(obj) = value.as_object() else {
        return ValidationResult::from_violations(vec![Violation::new("$", "expected an object")]);
    };

    match obj.get("lastUpdated") {
        Some(v) if v.is_i64() || v.is_u64() => {}
        Some(_) => errors.push(Violation::new("lastUpdated", "expected an integer timestamp")),
        None => errors.push(Violation::new("lastUpdated", "missing")),
    }

    match obj.get("history") {
        Some(Value::Array(records)) => {
            for (i, rec) in records.iter().enumerate() {
                validate_record_value(i, rec, &mut errors);
            }
        }
        Some(_) => errors.push(Violation::new("history", "expected an array")),
        None => errors.push(Violation::new("history", "missing")),
    }

    ValidationResult::from_violations(errors)
}

/// Violations of one raw record, with paths prefixed by `history[index]`.
pub fn record_violations(index: usize, rec: &Value) -> Vec<Violation> {
    let mut errors = Vec::new();
    validate_record_value(index, rec, &mut errors);
    errors
}

fn validate_record_value(index: usize, rec: &Value, errors: &mut Vec<Violation>) {
    let path = |field: &str| format!("history[{index}].{field}");

    let Some(obj) = rec.as_object() else {
        errors.push(Violation::new(format!("history[{index}]"), "expected an object"));
        return;
    };

    match obj.get("locale").and_then(Value::as_str) {
        Some(l) if !l.trim().is_empty() => {}
        Some(_) => errors.push(Violation::new(path("locale"), "must not be empty")),
        None => errors.push(Violation::new(path("locale"), "missing or not a string")),
    }

    match obj.get("source").and_then(Value::as_str) {
        Some(s) if DetectionSource::parse(s).is_some() => {}
        Some(s) => errors.push(Violation::new(path("source"), format!("unknown source '{s}'"))),
        None => errors.push(Violation::new(path("source"), "missing or not a string")),
    }

    match obj.get("timestamp") {
        Some(v) if v.as_i64().is_some_and(|t| t >= 0) => {}
        Some(_) => errors.push(Violation::new(path("timestamp"), "expected a non-negative integer")),
        None => errors.push(Violation::new(path("timestamp"), "missing")),
    }

    match obj.get("confidence").and_then(Value::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => {}
        Some(c) => errors.push(Violation::new(path("confidence"), format!("{c} is outside [0, 1]"))),
        None => errors.push(Violation::new(path("confidence"), "missing or not a number")),
    }
}

/// Uniform envelope returned by every public read/write.
///
/// Callers must branch on `success` before touching `data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backend that served the operation, if one was involved.
    pub source: Option<BackendKind>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
}

impl<T> StorageOperationResult<T> {
    pub fn ok(data: T, source: Option<BackendKind>, timestamp: i64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            source,
            timestamp,
            response_time: None,
        }
    }

    pub fn failed<E: fmt::Display>(error: E, source: Option<BackendKind>, timestamp: i64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            source,
            timestamp,
            response_time: None,
        }
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time = Some(ms);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| "operation failed".to_string())),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StorageOperationResult<U> {
        StorageOperationResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            source: self.source,
            timestamp: self.timestamp,
            response_time: self.response_time,
        }
    }
}

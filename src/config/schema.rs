//! Declarative schema for the storage configuration document.
//!
//! Validation runs over the raw JSON value so it can report *every* problem
//! (missing keys, wrong types, out-of-range numbers, unknown enum members and
//! cross-field predicates) instead of stopping at the first serde error.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::path::get_path;

const TEN_YEARS_MS: i64 = 10 * 365 * 24 * 60 * 60 * 1000;
const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;
const FIFTY_MIB: i64 = 50 * 1024 * 1024;

pub const BACKEND_NAMES: &[&str] = &["cookie", "localStorage", "sessionStorage", "indexedDB", "memory"];
pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
pub const COMPRESSION_ALGORITHMS: &[&str] = &["none", "gzip", "deflate", "lz-string"];
pub const ENCRYPTION_ALGORITHMS: &[&str] = &["AES-GCM", "AES-CBC"];
pub const KEY_DERIVATIONS: &[&str] = &["PBKDF2", "scrypt"];
pub const CONFLICT_RESOLUTIONS: &[&str] = &["local", "remote", "latest", "merge"];

/// One problem found in a config or data document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<Violation>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn from_violations(errors: Vec<Violation>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Bool,
    Str,
    Integer { min: i64, max: i64 },
    Enum(&'static [&'static str]),
    /// Non-empty list whose members come from the given set.
    EnumList(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
struct FieldRule {
    path: &'static str,
    kind: FieldKind,
}

const fn rule(path: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule { path, kind }
}

const fn int(min: i64, max: i64) -> FieldKind {
    FieldKind::Integer { min, max }
}

const RULES: &[FieldRule] = &[
    rule("version", FieldKind::Str),
    rule("backends.cookie", FieldKind::Bool),
    rule("backends.localStorage", FieldKind::Bool),
    rule("backends.sessionStorage", FieldKind::Bool),
    rule("backends.indexedDB", FieldKind::Bool),
    rule("backends.memory", FieldKind::Bool),
    rule("retention.preferences", int(0, TEN_YEARS_MS)),
    rule("retention.history", int(0, TEN_YEARS_MS)),
    rule("retention.analytics", int(0, TEN_YEARS_MS)),
    rule("retention.cache", int(0, ONE_DAY_MS)),
    rule("performance.maxEntries", int(1, 10_000)),
    rule("performance.maxPreferenceEntries", int(1, 10_000)),
    rule("performance.maxSize", int(1024, FIFTY_MIB)),
    rule("performance.batchSize", int(1, 1_000)),
    rule("performance.throttleDelay", int(0, 60_000)),
    rule("compression.enabled", FieldKind::Bool),
    rule("compression.algorithm", FieldKind::Enum(COMPRESSION_ALGORITHMS)),
    rule("compression.threshold", int(0, FIFTY_MIB)),
    rule("encryption.enabled", FieldKind::Bool),
    rule("encryption.algorithm", FieldKind::Enum(ENCRYPTION_ALGORITHMS)),
    rule("encryption.keyDerivation", FieldKind::Enum(KEY_DERIVATIONS)),
    rule("encryption.keyLength", int(128, 512)),
    rule("encryption.saltLength", int(8, 64)),
    rule("encryption.iterations", int(1_000, 10_000_000)),
    rule("sync.enabled", FieldKind::Bool),
    rule("sync.interval", int(1_000, ONE_DAY_MS)),
    rule("sync.retryAttempts", int(0, 10)),
    rule("sync.timeout", int(100, 300_000)),
    rule("sync.conflictResolution", FieldKind::Enum(CONFLICT_RESOLUTIONS)),
    rule("healthCheck.enabled", FieldKind::Bool),
    rule("healthCheck.interval", int(1_000, ONE_DAY_MS)),
    rule("healthCheck.timeout", int(1, 60_000)),
    rule("healthCheck.retryAttempts", int(0, 10)),
    rule("errorHandling.retryAttempts", int(0, 10)),
    rule("errorHandling.retryDelay", int(0, 60_000)),
    rule("errorHandling.fallbackStorage", FieldKind::EnumList(BACKEND_NAMES)),
    rule("errorHandling.logErrors", FieldKind::Bool),
    rule("debug.enabled", FieldKind::Bool),
    rule("debug.logLevel", FieldKind::Enum(LOG_LEVELS)),
    rule("debug.logToConsole", FieldKind::Bool),
    rule("debug.logToStorage", FieldKind::Bool),
];

/// Cross-field predicate; returns a violation when the document breaks it.
type Predicate = fn(&Value) -> Option<Violation>;

const PREDICATES: &[Predicate] = &[
    preference_limit_within_history_limit,
    compression_threshold_within_max_size,
    health_timeout_below_interval,
    fallback_backends_enabled,
    encryption_key_length,
];

fn int_at(doc: &Value, path: &str) -> Option<i64> {
    get_path(doc, path).and_then(Value::as_i64)
}

fn preference_limit_within_history_limit(doc: &Value) -> Option<Violation> {
    let prefs = int_at(doc, "performance.maxPreferenceEntries")?;
    let history = int_at(doc, "performance.maxEntries")?;
    (prefs > history).then(|| {
        Violation::new(
            "performance.maxPreferenceEntries",
            format!("{prefs} exceeds performance.maxEntries ({history})"),
        )
    })
}

fn compression_threshold_within_max_size(doc: &Value) -> Option<Violation> {
    let threshold = int_at(doc, "compression.threshold")?;
    let max_size = int_at(doc, "performance.maxSize")?;
    (threshold > max_size).then(|| {
        Violation::new(
            "compression.threshold",
            format!("{threshold} exceeds performance.maxSize ({max_size})"),
        )
    })
}

fn health_timeout_below_interval(doc: &Value) -> Option<Violation> {
    let timeout = int_at(doc, "healthCheck.timeout")?;
    let interval = int_at(doc, "healthCheck.interval")?;
    (timeout >= interval).then(|| {
        Violation::new(
            "healthCheck.timeout",
            format!("{timeout} must be below healthCheck.interval ({interval})"),
        )
    })
}

fn fallback_backends_enabled(doc: &Value) -> Option<Violation> {
    let list = get_path(doc, "errorHandling.fallbackStorage")?.as_array()?;
    let disabled: Vec<&str> = list
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| get_path(doc, &format!("backends.{name}")).and_then(Value::as_bool) == Some(false))
        .collect();
    (!disabled.is_empty()).then(|| {
        Violation::new(
            "errorHandling.fallbackStorage",
            format!("lists disabled backend(s): {}", disabled.join(", ")),
        )
    })
}

fn encryption_key_length(doc: &Value) -> Option<Violation> {
    if get_path(doc, "encryption.enabled").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let len = int_at(doc, "encryption.keyLength")?;
    (![128, 192, 256].contains(&len)).then(|| {
        Violation::new("encryption.keyLength", format!("{len} is not one of 128, 192, 256"))
    })
}

fn check_rule(doc: &Value, rule: &FieldRule) -> Option<Violation> {
    let Some(value) = get_path(doc, rule.path) else {
        return Some(Violation::new(rule.path, "missing"));
    };

    match rule.kind {
        FieldKind::Bool if !value.is_boolean() => Some(Violation::new(rule.path, "expected a boolean")),
        FieldKind::Str if !value.is_string() => Some(Violation::new(rule.path, "expected a string")),
        FieldKind::Integer { min, max } => match value.as_i64() {
            None => Some(Violation::new(rule.path, "expected an integer")),
            Some(n) if n < min || n > max => {
                Some(Violation::new(rule.path, format!("{n} is outside [{min}, {max}]")))
            }
            Some(_) => None,
        },
        FieldKind::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => None,
            Some(s) => Some(Violation::new(
                rule.path,
                format!("'{s}' is not one of {}", allowed.join("|")),
            )),
            None => Some(Violation::new(rule.path, "expected a string")),
        },
        FieldKind::EnumList(allowed) => match value.as_array() {
            None => Some(Violation::new(rule.path, "expected an array")),
            Some(items) if items.is_empty() => Some(Violation::new(rule.path, "must not be empty")),
            Some(items) => items
                .iter()
                .find(|item| !item.as_str().is_some_and(|s| allowed.contains(&s)))
                .map(|bad| Violation::new(rule.path, format!("{bad} is not one of {}", allowed.join("|")))),
        },
        _ => None,
    }
}

/// Validates a full configuration document. Never panics; every failure is
/// collected into the returned [`ValidationResult`].
pub fn validate(doc: &Value) -> ValidationResult {
    if !doc.is_object() {
        return ValidationResult::from_violations(vec![Violation::new("$", "expected an object")]);
    }

    let mut errors: Vec<Violation> = RULES.iter().filter_map(|r| check_rule(doc, r)).collect();
    // Predicates only make sense once every leaf has the right type.
    if errors.is_empty() {
        errors.extend(PREDICATES.iter().filter_map(|p| p(doc)));
    }

    let mut result = ValidationResult::from_violations(errors);

    if get_path(doc, "encryption.enabled").and_then(Value::as_bool) == Some(true) {
        result
            .warnings
            .push("encryption is enabled but only the passthrough codec is installed".to_string());
    }
    if get_path(doc, "debug.logToStorage").and_then(Value::as_bool) == Some(true)
        && get_path(doc, "debug.enabled").and_then(Value::as_bool) == Some(false)
    {
        result
            .warnings
            .push("debug.logToStorage has no effect while debug.enabled is false".to_string());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::config::path::set_path;
    use serde_json::json;

    fn default_doc() -> Value {
        StorageConfig::default().to_value()
    }

    #[test]
    fn default_config_is_valid() {
        let res = validate(&default_doc());
        assert!(res.valid, "{:?}", res.errors);
    }

    #[test]
    fn missing_key_is_reported() {
        let mut doc = default_doc();
        doc["retention"].as_object_mut().unwrap().remove("history");
        let res = validate(&doc);
        assert!(!res.valid);
        assert_eq!(res.errors, vec![Violation::new("retention.history", "missing")]);
    }

    #[test]
    fn wrong_type_and_range_are_both_reported() {
        let mut doc = default_doc();
        set_path(&mut doc, "debug.enabled", json!("yes"));
        set_path(&mut doc, "performance.maxEntries", json!(0));
        let res = validate(&doc);
        assert_eq!(res.errors.len(), 2);
        assert!(res.errors.iter().any(|e| e.path == "debug.enabled"));
        assert!(res.errors.iter().any(|e| e.path == "performance.maxEntries"));
    }

    #[test]
    fn max_entries_must_be_an_integer() {
        let mut doc = default_doc();
        set_path(&mut doc, "performance.maxEntries", json!(10.5));
        let res = validate(&doc);
        assert_eq!(res.errors[0].message, "expected an integer");
    }

    #[test]
    fn negative_retention_is_rejected() {
        let mut doc = default_doc();
        set_path(&mut doc, "retention.preferences", json!(-1));
        assert!(!validate(&doc).valid);
    }

    #[test]
    fn unknown_enum_member_is_rejected() {
        let mut doc = default_doc();
        set_path(&mut doc, "sync.conflictResolution", json!("coin-flip"));
        let res = validate(&doc);
        assert!(res.errors[0].message.contains("coin-flip"));
    }

    #[test]
    fn fallback_list_must_be_known_and_non_empty() {
        let mut doc = default_doc();
        set_path(&mut doc, "errorHandling.fallbackStorage", json!([]));
        assert!(!validate(&doc).valid);
        set_path(&mut doc, "errorHandling.fallbackStorage", json!(["floppy"]));
        assert!(!validate(&doc).valid);
    }

    #[test]
    fn predicates_catch_cross_field_problems() {
        let mut doc = default_doc();
        set_path(&mut doc, "performance.maxPreferenceEntries", json!(500));
        set_path(&mut doc, "backends.cookie", json!(false));
        let res = validate(&doc);
        let paths: Vec<_> = res.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"performance.maxPreferenceEntries"));
        assert!(paths.contains(&"errorHandling.fallbackStorage"));
    }

    #[test]
    fn encryption_warns_about_passthrough_codec() {
        let mut doc = default_doc();
        set_path(&mut doc, "encryption.enabled", json!(true));
        let res = validate(&doc);
        assert!(res.valid);
        assert_eq!(res.warnings.len(), 1);
    }

    #[test]
    fn non_object_document_is_invalid() {
        assert!(!validate(&json!(42)).valid);
    }
}

//! Schema migrations for the configuration document.
//!
//! Each [`Migration`] advances the document by exactly one version through an
//! ordered list of declarative [`MigrationStep`]s. [`migrate`] chains them in
//! version order, so `v1 -> v3` is the same as `v1 -> v2` followed by `v2 -> v3`,
//! and migrating a version to itself returns the document unchanged.

use serde_json::{json, Value};

use super::path::{get_path, set_path, take_path};
use crate::errors::StoreError;

pub const VERSIONS: &[&str] = &["v1", "v2", "v3"];
pub const CURRENT_VERSION: &str = "v3";

#[derive(Debug, Clone, Copy)]
pub enum MigrationStep {
    /// Renames the last segment of `from`, keeping the same parent.
    Rename { from: &'static str, to: &'static str },
    /// Moves a field to an arbitrary new path.
    Move { from: &'static str, to: &'static str },
    /// Rewrites the value in place with a pure function.
    Transform { path: &'static str, f: fn(Value) -> Value },
    Delete { path: &'static str },
    /// Adds a field only if it is absent.
    Add { path: &'static str, default: fn() -> Value },
}

impl MigrationStep {
    fn apply(&self, doc: &mut Value) {
        match *self {
            MigrationStep::Rename { from, to } => {
                let target = match from.rsplit_once('.') {
                    Some((parent, _)) => format!("{parent}.{to}"),
                    None => to.to_string(),
                };
                relocate(doc, from, &target);
            }
            MigrationStep::Move { from, to } => relocate(doc, from, to),
            MigrationStep::Transform { path, f } => {
                if let Some(v) = take_path(doc, path) {
                    set_path(doc, path, f(v));
                }
            }
            MigrationStep::Delete { path } => {
                take_path(doc, path);
            }
            MigrationStep::Add { path, default } => {
                if get_path(doc, path).is_none() {
                    set_path(doc, path, default());
                }
            }
        }
    }
}

/// Moves `from` to `to` unless `to` already holds a value.
fn relocate(doc: &mut Value, from: &str, to: &str) {
    if let Some(v) = take_path(doc, from) {
        if get_path(doc, to).is_none() {
            set_path(doc, to, v);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub from: &'static str,
    pub to: &'static str,
    pub steps: &'static [MigrationStep],
}

fn log_level_name(v: Value) -> Value {
    match v.as_u64() {
        Some(0) => json!("error"),
        Some(1) => json!("warn"),
        Some(2) => json!("info"),
        Some(3) => json!("debug"),
        Some(_) => json!("trace"),
        None => v,
    }
}

fn default_health_check() -> Value {
    json!({ "enabled": true, "interval": 60_000, "timeout": 5_000, "retryAttempts": 3 })
}

fn default_conflict_resolution() -> Value {
    json!("latest")
}

fn default_max_preference_entries() -> Value {
    json!(50)
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        from: "v1",
        to: "v2",
        steps: &[
            MigrationStep::Rename {
                from: "retention.detections",
                to: "history",
            },
            MigrationStep::Move {
                from: "maxEntries",
                to: "performance.maxEntries",
            },
            MigrationStep::Add {
                path: "healthCheck",
                default: default_health_check,
            },
        ],
    },
    Migration {
        from: "v2",
        to: "v3",
        steps: &[
            MigrationStep::Transform {
                path: "debug.logLevel",
                f: log_level_name,
            },
            MigrationStep::Delete {
                path: "legacyCookieName",
            },
            MigrationStep::Add {
                path: "sync.conflictResolution",
                default: default_conflict_resolution,
            },
            MigrationStep::Add {
                path: "performance.maxPreferenceEntries",
                default: default_max_preference_entries,
            },
        ],
    },
];

fn version_index(version: &str) -> Option<usize> {
    VERSIONS.iter().position(|v| *v == version)
}

/// Version recorded in the document; documents without one predate versioning.
pub fn detect_version(doc: &Value) -> &str {
    doc.get("version").and_then(Value::as_str).unwrap_or("v1")
}

/// Migrates `doc` from `from` to `to`. Downgrades and unknown versions are errors.
pub fn migrate(doc: &Value, from: &str, to: &str) -> Result<Value, StoreError> {
    let err = |reason: &str| StoreError::Migration {
        from: from.to_string(),
        to: to.to_string(),
        reason: reason.to_string(),
    };

    let start = version_index(from).ok_or_else(|| err("unknown source version"))?;
    let end = version_index(to).ok_or_else(|| err("unknown target version"))?;
    if start > end {
        return Err(err("downgrades are not supported"));
    }

    let mut out = doc.clone();
    for migration in &MIGRATIONS[start..end] {
        log::debug!(target: "locale_store", "migrating config {} -> {}", migration.from, migration.to);
        for step in migration.steps {
            step.apply(&mut out);
        }
        set_path(&mut out, "version", json!(migration.to));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_doc() -> Value {
        json!({
            "maxEntries": 250,
            "legacyCookieName": "NEXT_LOCALE_OLD",
            "retention": { "detections": 86_400_000, "preferences": 1 },
            "debug": { "enabled": true, "logLevel": 3 },
            "sync": { "enabled": false }
        })
    }

    #[test]
    fn migrations_cover_every_adjacent_version_pair() {
        assert_eq!(MIGRATIONS.len(), VERSIONS.len() - 1);
        for (m, pair) in MIGRATIONS.iter().zip(VERSIONS.windows(2)) {
            assert_eq!((m.from, m.to), (pair[0], pair[1]));
        }
        assert_eq!(*VERSIONS.last().unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn v1_to_v2_renames_moves_and_adds() {
        let out = migrate(&v1_doc(), "v1", "v2").unwrap();
        assert_eq!(out["version"], "v2");
        assert_eq!(out["retention"]["history"], 86_400_000);
        assert!(out["retention"].get("detections").is_none());
        assert_eq!(out["performance"]["maxEntries"], 250);
        assert!(out.get("maxEntries").is_none());
        assert_eq!(out["healthCheck"]["timeout"], 5_000);
    }

    #[test]
    fn v2_to_v3_transforms_deletes_and_adds() {
        let v2 = migrate(&v1_doc(), "v1", "v2").unwrap();
        let out = migrate(&v2, "v2", "v3").unwrap();
        assert_eq!(out["version"], "v3");
        assert_eq!(out["debug"]["logLevel"], "debug");
        assert!(out.get("legacyCookieName").is_none());
        assert_eq!(out["sync"]["conflictResolution"], "latest");
        assert_eq!(out["performance"]["maxPreferenceEntries"], 50);
    }

    #[test]
    fn migration_composes() {
        let direct = migrate(&v1_doc(), "v1", "v3").unwrap();
        let stepwise = migrate(&migrate(&v1_doc(), "v1", "v2").unwrap(), "v2", "v3").unwrap();
        assert_eq!(direct, stepwise);
    }

    #[test]
    fn same_version_is_noop() {
        let doc = v1_doc();
        assert_eq!(migrate(&doc, "v1", "v1").unwrap(), doc);
        assert_eq!(migrate(&doc, "v3", "v3").unwrap(), doc);
    }

    #[test]
    fn add_does_not_overwrite_existing_values() {
        let mut doc = v1_doc();
        doc["sync"]["conflictResolution"] = json!("remote");
        let out = migrate(&doc, "v1", "v3").unwrap();
        assert_eq!(out["sync"]["conflictResolution"], "remote");
    }

    #[test]
    fn downgrade_and_unknown_versions_fail() {
        assert!(matches!(migrate(&v1_doc(), "v3", "v1"), Err(StoreError::Migration { .. })));
        assert!(migrate(&v1_doc(), "v0", "v3").is_err());
        assert!(migrate(&v1_doc(), "v1", "v9").is_err());
    }

    #[test]
    fn detect_version_defaults_to_v1() {
        assert_eq!(detect_version(&json!({})), "v1");
        assert_eq!(detect_version(&json!({ "version": "v2" })), "v2");
    }
}

//! Storage configuration.
//!
//! `StorageConfig` is the typed view of a versioned JSON document. The
//! document is what gets validated, migrated and merged; the typed struct is
//! only produced once the document passes [`schema::validate`], so a
//! `StorageConfig` in hand is always a valid one.
//!
//! # Lifecycle
//!
//! A [`ConfigManager`] is built once at start-up from a preset merged with
//! environment overrides, and is afterwards only changed through
//! [`ConfigManager::update_config`], which merges, re-validates and then swaps
//! the shared snapshot in one step. A rejected update leaves the previous
//! config in place.
//!
//! # Example
//!
//! ```rust
//! use locale_store::config::{ConfigManager, StorageConfig};
//! use serde_json::json;
//!
//! let manager = ConfigManager::new(StorageConfig::apply_preset("test").unwrap());
//! manager
//!     .update_config(&json!({ "performance": { "maxEntries": 20, "maxPreferenceEntries": 10 } }))
//!     .unwrap();
//! assert_eq!(manager.snapshot().performance.max_entries, 20);
//!
//! // Invalid updates are rejected as a whole.
//! assert!(manager.update_config(&json!({ "performance": { "maxEntries": 0 } })).is_err());
//! assert_eq!(manager.snapshot().performance.max_entries, 20);
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::BackendKind;
use crate::errors::StoreError;

pub mod merge;
pub mod migrate;
pub mod path;
pub mod presets;
pub mod schema;

pub use merge::merge;
pub use migrate::{detect_version, migrate, CURRENT_VERSION};
pub use schema::{validate, ValidationResult, Violation};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub version: String,
    pub backends: BackendToggles,
    pub retention: RetentionConfig,
    pub performance: PerformanceConfig,
    pub compression: CompressionConfig,
    pub encryption: EncryptionConfig,
    pub sync: SyncConfig,
    pub health_check: HealthCheckConfig,
    pub error_handling: ErrorHandlingConfig,
    pub debug: DebugConfig,
}

/// Enable flag per physical medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendToggles {
    pub cookie: bool,
    pub local_storage: bool,
    pub session_storage: bool,
    #[serde(rename = "indexedDB")]
    pub indexed_db: bool,
    pub memory: bool,
}

impl BackendToggles {
    pub fn is_enabled(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Cookie => self.cookie,
            BackendKind::LocalStorage => self.local_storage,
            BackendKind::SessionStorage => self.session_storage,
            BackendKind::IndexedDb => self.indexed_db,
            BackendKind::Memory => self.memory,
        }
    }
}

/// Maximum ages, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    pub preferences: u64,
    pub history: u64,
    pub analytics: u64,
    pub cache: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    /// Upper bound of the detection history list.
    pub max_entries: usize,
    /// Upper bound of the preference list.
    pub max_preference_entries: usize,
    /// Upper bound, in bytes, of one serialized blob.
    pub max_size: usize,
    pub batch_size: usize,
    pub throttle_delay: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "deflate")]
    Deflate,
    #[serde(rename = "lz-string")]
    LzString,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionConfig {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithm,
    pub threshold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    #[serde(rename = "AES-GCM")]
    AesGcm,
    #[serde(rename = "AES-CBC")]
    AesCbc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyDerivation {
    #[serde(rename = "PBKDF2")]
    Pbkdf2,
    #[serde(rename = "scrypt")]
    Scrypt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub algorithm: EncryptionAlgorithm,
    pub key_derivation: KeyDerivation,
    pub key_length: u32,
    pub salt_length: u32,
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Local copy wins.
    Local,
    /// Remote copy wins.
    Remote,
    /// Copy with the newest `lastUpdated` wins.
    Latest,
    /// Union of both record lists, deduplicated.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval: u64,
    pub retry_attempts: u32,
    pub timeout: u64,
    pub conflict_resolution: ConflictResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: u64,
    pub timeout: u64,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingConfig {
    pub retry_attempts: u32,
    pub retry_delay: u64,
    /// Backend priority order; the memory backend is always appended last.
    pub fallback_storage: Vec<BackendKind>,
    pub log_errors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    pub fn allows(self, level: log::Level) -> bool {
        level <= self.to_level_filter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfig {
    pub enabled: bool,
    pub log_level: LogLevel,
    pub log_to_console: bool,
    pub log_to_storage: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            backends: BackendToggles {
                cookie: true,
                local_storage: true,
                session_storage: true,
                indexed_db: true,
                memory: true,
            },
            retention: RetentionConfig {
                preferences: 365 * DAY_MS,
                history: 30 * DAY_MS,
                analytics: 90 * DAY_MS,
                cache: 5 * 60 * 1000,
            },
            performance: PerformanceConfig {
                max_entries: 100,
                max_preference_entries: 50,
                max_size: 1024 * 1024,
                batch_size: 10,
                throttle_delay: 100,
            },
            compression: CompressionConfig {
                enabled: false,
                algorithm: CompressionAlgorithm::LzString,
                threshold: 1024,
            },
            encryption: EncryptionConfig {
                enabled: false,
                algorithm: EncryptionAlgorithm::AesGcm,
                key_derivation: KeyDerivation::Pbkdf2,
                key_length: 256,
                salt_length: 16,
                iterations: 100_000,
            },
            sync: SyncConfig {
                enabled: false,
                interval: 300_000,
                retry_attempts: 3,
                timeout: 10_000,
                conflict_resolution: ConflictResolution::Latest,
            },
            health_check: HealthCheckConfig {
                enabled: true,
                interval: 60_000,
                timeout: 5_000,
                retry_attempts: 3,
            },
            error_handling: ErrorHandlingConfig {
                retry_attempts: 3,
                retry_delay: 1_000,
                fallback_storage: vec![BackendKind::LocalStorage, BackendKind::Cookie, BackendKind::Memory],
                log_errors: true,
            },
            debug: DebugConfig {
                enabled: false,
                log_level: LogLevel::Warn,
                log_to_console: true,
                log_to_storage: false,
            },
        }
    }
}

impl StorageConfig {
    pub fn to_value(&self) -> Value {
        // A struct of plain fields and unit enums always serializes.
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// Builds a config from a document of any known version: older documents
    /// are migrated to the current version, then validated as a whole.
    pub fn from_value(doc: &Value) -> Result<Self, StoreError> {
        let version = detect_version(doc).to_string();
        let doc = migrate(doc, &version, CURRENT_VERSION)?;
        let res = validate(&doc);
        if !res.valid {
            return Err(StoreError::Validation(res.errors));
        }
        for warning in &res.warnings {
            log::warn!(target: "locale_store", "config: {warning}");
        }
        Ok(serde_json::from_value(doc)?)
    }

    /// Default config with the named preset merged over it.
    pub fn apply_preset(name: &str) -> Result<Self, StoreError> {
        let partial = presets::preset(name)?;
        Self::from_value(&merge(&Self::default().to_value(), &partial))
    }

    pub fn validate(&self) -> ValidationResult {
        validate(&self.to_value())
    }

    /// Returns a copy with `partial` merged over this config, validated.
    pub fn merged(&self, partial: &Value) -> Result<Self, StoreError> {
        Self::from_value(&merge(&self.to_value(), partial))
    }
}

/// Translates `LOCALE_STORE_*` variables into a preset name and a partial document.
///
/// `lookup` abstracts over `std::env::var` so the mapping can be tested
/// without touching the process environment.
pub fn env_overrides(lookup: impl Fn(&str) -> Option<String>) -> Result<(Option<String>, Value), StoreError> {
    let mut partial = json!({});
    let mut violations = Vec::new();

    let preset = lookup("LOCALE_STORE_PRESET");

    if let Some(raw) = lookup("LOCALE_STORE_DEBUG") {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => path::set_path(&mut partial, "debug.enabled", json!(true)),
            "0" | "false" | "no" | "off" => path::set_path(&mut partial, "debug.enabled", json!(false)),
            _ => violations.push(Violation::new("LOCALE_STORE_DEBUG", format!("'{raw}' is not a boolean"))),
        }
    }

    if let Some(raw) = lookup("LOCALE_STORE_LOG_LEVEL") {
        path::set_path(&mut partial, "debug.logLevel", json!(raw.to_ascii_lowercase()));
    }

    if let Some(raw) = lookup("LOCALE_STORE_MAX_ENTRIES") {
        match raw.trim().parse::<i64>() {
            Ok(n) => path::set_path(&mut partial, "performance.maxEntries", json!(n)),
            Err(_) => violations.push(Violation::new(
                "LOCALE_STORE_MAX_ENTRIES",
                format!("'{raw}' is not an integer"),
            )),
        }
    }

    if let Some(raw) = lookup("LOCALE_STORE_FALLBACK") {
        let list: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        path::set_path(&mut partial, "errorHandling.fallbackStorage", json!(list));
    }

    if violations.is_empty() {
        Ok((preset, partial))
    } else {
        Err(StoreError::Validation(violations))
    }
}

/// Owner of the active configuration snapshot.
#[derive(Debug)]
pub struct ConfigManager {
    current: RwLock<Arc<StorageConfig>>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl ConfigManager {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn from_preset(name: &str) -> Result<Self, StoreError> {
        Ok(Self::new(StorageConfig::apply_preset(name)?))
    }

    /// Builds the start-up config from the process environment.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Preset (default `production`) merged with overrides, validated once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let (preset, overrides) = env_overrides(lookup)?;
        let preset = preset.unwrap_or_else(|| "production".to_string());
        let base = StorageConfig::apply_preset(&preset)?;
        let config = base.merged(&overrides)?;
        log::info!(target: "locale_store", "config initialised from preset '{preset}'");
        Ok(Self::new(config))
    }

    /// Current config. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<StorageConfig> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Merges `partial` over the current config and commits it only if the
    /// result validates. All-or-nothing.
    pub fn update_config(&self, partial: &Value) -> Result<Arc<StorageConfig>, StoreError> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(guard.merged(partial)?);
        *guard = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_round_trips_through_json() {
        let cfg = StorageConfig::default();
        let doc = cfg.to_value();
        assert_eq!(doc["backends"]["indexedDB"], true);
        assert_eq!(doc["errorHandling"]["fallbackStorage"], json!(["localStorage", "cookie", "memory"]));
        assert_eq!(StorageConfig::from_value(&doc).unwrap(), cfg);
    }

    #[test]
    fn presets_change_what_they_name() {
        let dev = StorageConfig::apply_preset("development").unwrap();
        assert!(dev.debug.enabled);
        assert_eq!(dev.debug.log_level, LogLevel::Debug);

        let security = StorageConfig::apply_preset("security").unwrap();
        assert!(!security.backends.cookie);
        assert!(security.encryption.enabled);
        assert_eq!(
            security.error_handling.fallback_storage,
            vec![BackendKind::SessionStorage, BackendKind::Memory]
        );
        // untouched keys keep their defaults
        assert_eq!(security.performance.max_entries, 100);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(matches!(StorageConfig::apply_preset("nope"), Err(StoreError::UnknownPreset(_))));
    }

    #[test]
    fn from_value_migrates_old_documents() {
        let mut v2 = StorageConfig::default().to_value();
        v2["version"] = json!("v2");
        v2["debug"]["logLevel"] = json!(2);
        v2["performance"].as_object_mut().unwrap().remove("maxPreferenceEntries");
        let cfg = StorageConfig::from_value(&v2).unwrap();
        assert_eq!(cfg.version, CURRENT_VERSION);
        assert_eq!(cfg.debug.log_level, LogLevel::Info);
        assert_eq!(cfg.performance.max_preference_entries, 50);
    }

    #[test]
    fn from_value_reports_all_violations() {
        let mut doc = StorageConfig::default().to_value();
        doc["performance"]["maxEntries"] = json!(-5);
        doc["debug"]["logLevel"] = json!("loud");
        match StorageConfig::from_value(&doc) {
            Err(StoreError::Validation(v)) => assert_eq!(v.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn update_is_all_or_nothing() {
        let manager = ConfigManager::default();
        let before = manager.snapshot();

        let res = manager.update_config(&json!({
            "performance": { "maxEntries": 20 },
            "sync": { "timeout": 1 }
        }));
        assert!(res.is_err());
        assert_eq!(*manager.snapshot(), *before);

        let after = manager.update_config(&json!({ "performance": { "maxEntries": 20, "maxPreferenceEntries": 10 } })).unwrap();
        assert_eq!(after.performance.max_entries, 20);
        assert_eq!(manager.snapshot().performance.max_preference_entries, 10);
    }

    #[test]
    fn env_overrides_build_partial_document() {
        let (preset, partial) = env_overrides(lookup_from(&[
            ("LOCALE_STORE_PRESET", "development"),
            ("LOCALE_STORE_DEBUG", "off"),
            ("LOCALE_STORE_MAX_ENTRIES", "75"),
            ("LOCALE_STORE_FALLBACK", "sessionStorage, memory"),
        ]))
        .unwrap();
        assert_eq!(preset.as_deref(), Some("development"));
        assert_eq!(
            partial,
            json!({
                "debug": { "enabled": false },
                "performance": { "maxEntries": 75 },
                "errorHandling": { "fallbackStorage": ["sessionStorage", "memory"] }
            })
        );
    }

    #[test]
    fn env_overrides_reject_garbage() {
        let err = env_overrides(lookup_from(&[("LOCALE_STORE_MAX_ENTRIES", "lots")])).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn from_lookup_applies_preset_then_overrides() {
        let manager = ConfigManager::from_lookup(lookup_from(&[
            ("LOCALE_STORE_PRESET", "performance"),
            ("LOCALE_STORE_LOG_LEVEL", "INFO"),
        ]))
        .unwrap();
        let cfg = manager.snapshot();
        assert_eq!(cfg.performance.max_entries, 500);
        assert_eq!(cfg.debug.log_level, LogLevel::Info);
    }

    #[test]
    fn from_lookup_rejects_unknown_preset_and_invalid_override() {
        assert!(ConfigManager::from_lookup(lookup_from(&[("LOCALE_STORE_PRESET", "qa")])).is_err());
        assert!(ConfigManager::from_lookup(lookup_from(&[("LOCALE_STORE_FALLBACK", "floppy")])).is_err());
    }

    #[test]
    fn log_level_gate() {
        assert!(LogLevel::Warn.allows(log::Level::Error));
        assert!(LogLevel::Warn.allows(log::Level::Warn));
        assert!(!LogLevel::Warn.allows(log::Level::Info));
    }
}

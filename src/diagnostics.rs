//! Logger collaborator shared by every service.
//!
//! Messages go through the `log` facade under the `locale_store` target when
//! `debug.logToConsole` is set, and are additionally kept in a bounded
//! in-memory buffer when `debug.logToStorage` is set. Logging never fails.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::clock::ClockHandle;
use crate::config::{DebugConfig, LogLevel, StorageConfig};

pub const LOG_TARGET: &str = "locale_store";
pub const MAX_DIAGNOSTIC_ENTRIES: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEntry {
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
struct Settings {
    debug: DebugConfig,
    log_errors: bool,
}

pub struct Diagnostics {
    settings: RwLock<Settings>,
    entries: Mutex<VecDeque<DiagnosticEntry>>,
    clock: ClockHandle,
}

impl Diagnostics {
    pub fn new(config: &StorageConfig, clock: ClockHandle) -> Self {
        Self {
            settings: RwLock::new(Settings {
                debug: config.debug.clone(),
                log_errors: config.error_handling.log_errors,
            }),
            entries: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Picks up a new debug/errorHandling section after a config update.
    pub fn apply_config(&self, config: &StorageConfig) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.debug = config.debug.clone();
        settings.log_errors = config.error_handling.log_errors;
    }

    pub fn debug(&self, message: &str, context: Option<Value>) {
        self.log(log::Level::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: Option<Value>) {
        self.log(log::Level::Info, message, context);
    }

    pub fn warn(&self, message: &str, context: Option<Value>) {
        self.log(log::Level::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: Option<Value>) {
        self.log(log::Level::Error, message, context);
    }

    pub fn log(&self, level: log::Level, message: &str, context: Option<Value>) {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner).clone();

        if level == log::Level::Error && !settings.log_errors {
            return;
        }
        let threshold = if settings.debug.enabled {
            settings.debug.log_level
        } else {
            LogLevel::Warn
        };
        if !threshold.allows(level) {
            return;
        }

        if settings.debug.log_to_console {
            match &context {
                Some(ctx) => log::log!(target: LOG_TARGET, level, "{message} {ctx}"),
                None => log::log!(target: LOG_TARGET, level, "{message}"),
            }
        }

        if settings.debug.enabled && settings.debug.log_to_storage {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.len() == MAX_DIAGNOSTIC_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(DiagnosticEntry {
                level: level.as_str().to_ascii_lowercase(),
                message: message.to_string(),
                context,
                timestamp: self.clock.now_ms(),
            });
        }
    }

    /// Entries retained by `debug.logToStorage`, oldest first.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear_entries(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn diagnostics(enabled: bool, level: LogLevel, to_storage: bool) -> Diagnostics {
        let mut cfg = StorageConfig::default();
        cfg.debug = DebugConfig {
            enabled,
            log_level: level,
            log_to_console: false,
            log_to_storage: to_storage,
        };
        Diagnostics::new(&cfg, Arc::new(ManualClock::new(10)))
    }

    #[test]
    fn stores_entries_at_or_above_level() {
        let d = diagnostics(true, LogLevel::Info, true);
        d.debug("hidden", None);
        d.info("shown", Some(json!({ "k": 1 })));
        d.error("also shown", None);
        let entries = d.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, "info");
        assert_eq!(entries[0].context, Some(json!({ "k": 1 })));
        assert_eq!(entries[1].timestamp, 10);
    }

    #[test]
    fn nothing_stored_while_debug_disabled() {
        let d = diagnostics(false, LogLevel::Trace, true);
        d.error("boom", None);
        assert!(d.entries().is_empty());
    }

    #[test]
    fn buffer_is_bounded() {
        let d = diagnostics(true, LogLevel::Trace, true);
        for i in 0..(MAX_DIAGNOSTIC_ENTRIES + 5) {
            d.debug(&format!("m{i}"), None);
        }
        let entries = d.entries();
        assert_eq!(entries.len(), MAX_DIAGNOSTIC_ENTRIES);
        assert_eq!(entries[0].message, "m5");
    }

    #[test]
    fn log_errors_false_silences_errors() {
        let mut cfg = StorageConfig::default();
        cfg.debug.enabled = true;
        cfg.debug.log_to_storage = true;
        cfg.error_handling.log_errors = false;
        let d = Diagnostics::new(&cfg, Arc::new(ManualClock::new(0)));
        d.error("quiet", None);
        d.warn("loud", None);
        assert_eq!(d.entries().len(), 1);
    }

    #[test]
    fn apply_config_switches_storage_on() {
        let d = diagnostics(false, LogLevel::Warn, false);
        d.warn("before", None);
        let mut cfg = StorageConfig::default();
        cfg.debug.enabled = true;
        cfg.debug.log_to_storage = true;
        d.apply_config(&cfg);
        d.warn("after", None);
        let entries = d.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "after");
    }
}

use serde_json::{json, Value};

use crate::errors::StoreError;

pub const PRESET_NAMES: &[&str] = &["development", "production", "test", "performance", "security"];

/// Returns the partial document for a named preset. Unknown names are an error.
pub fn preset(name: &str) -> Result<Value, StoreError> {
    let partial = match name {
        "development" => json!({
            "retention": { "cache": 1_000 },
            "healthCheck": { "interval": 30_000 },
            "debug": { "enabled": true, "logLevel": "debug", "logToConsole": true, "logToStorage": true }
        }),
        "production" => json!({
            "compression": { "enabled": true },
            "healthCheck": { "interval": 300_000 },
            "debug": { "enabled": false, "logLevel": "error", "logToStorage": false }
        }),
        "test" => json!({
            "backends": { "cookie": false, "localStorage": false, "sessionStorage": false, "indexedDB": false },
            "errorHandling": { "fallbackStorage": ["memory"], "retryDelay": 0 },
            "retention": { "cache": 0 },
            "healthCheck": { "enabled": false },
            "debug": { "enabled": false, "logLevel": "warn" }
        }),
        "performance" => json!({
            "retention": { "cache": 900_000 },
            "performance": { "maxEntries": 500, "maxPreferenceEntries": 100, "batchSize": 50, "throttleDelay": 0 },
            "compression": { "enabled": true, "threshold": 4_096 }
        }),
        "security" => json!({
            "backends": { "cookie": false },
            "retention": { "history": 7 * 24 * 60 * 60 * 1000_i64, "analytics": 7 * 24 * 60 * 60 * 1000_i64 },
            "encryption": { "enabled": true, "keyLength": 256 },
            "errorHandling": { "fallbackStorage": ["sessionStorage", "memory"] },
            "debug": { "logToStorage": false }
        }),
        other => return Err(StoreError::UnknownPreset(other.to_string())),
    };
    Ok(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{merge::merge, schema::validate, StorageConfig};

    #[test]
    fn every_preset_validates_over_the_default() {
        let base = StorageConfig::default().to_value();
        for name in PRESET_NAMES {
            let doc = merge(&base, &preset(name).unwrap());
            let res = validate(&doc);
            assert!(res.valid, "preset {name} invalid: {:?}", res.errors);
        }
    }

    #[test]
    fn unknown_preset_is_an_error() {
        assert!(matches!(preset("staging"), Err(StoreError::UnknownPreset(n)) if n == "staging"));
    }
}

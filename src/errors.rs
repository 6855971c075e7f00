use crate::backend::BackendKind;
use crate::config::schema::Violation;

/// Failures raised by a single backend adapter.
///
/// These never leave the [`BackendManager`](crate::backend::BackendManager): it
/// recovers by falling back to the next adapter and only reports
/// [`StoreError::AllBackendsFailed`] when the whole chain is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable { backend: BackendKind, reason: String },

    #[error("{backend} quota exceeded ({needed} bytes needed, limit {limit})")]
    QuotaExceeded {
        backend: BackendKind,
        needed: usize,
        limit: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Cannot migrate config from {from} to {to}: {reason}")]
    Migration {
        from: String,
        to: String,
        reason: String,
    },

    #[error("All storage backends failed: {}", .0.join("; "))]
    AllBackendsFailed(Vec<String>),

    #[error("Removed from [{}] but not from: {}", .cleared.join(", "), .failures.join("; "))]
    PartiallyRemoved {
        cleared: Vec<String>,
        failures: Vec<String>,
    },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Sync is disabled")]
    SyncDisabled,
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::QuotaExceeded { .. } => StoreError::QuotaExceeded(err.to_string()),
            other => StoreError::BackendUnavailable(other.to_string()),
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

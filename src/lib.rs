//! Persistence for locale detections and explicit locale preferences.
//!
//! Start with [`LocaleStore::builder`]; the modules below are the pieces it
//! wires together.

pub mod analytics;
pub mod backend;
pub mod backup;
pub mod clock;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod events;
pub mod health;
pub mod maintenance;
pub mod record;
pub mod service;
pub mod store;
pub mod sync;

pub use backend::{BackendAdapter, BackendKind, BackendManager};
pub use config::{ConfigManager, StorageConfig};
pub use errors::{BackendError, StoreError};
pub use events::{EventBus, ListenerId, StorageEvent};
pub use maintenance::MaintenanceOptions;
pub use record::{DetectionRecord, DetectionSource, LocaleDetectionHistory, PreferenceRecord, StorageOperationResult};
pub use service::{LocaleStore, LocaleStoreBuilder};
pub use store::{HISTORY_KEY, PREFERENCE_KEY};

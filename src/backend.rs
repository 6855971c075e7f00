//! Storage backends.
//!
//! A backend adapter is a uniform get/set/remove wrapper around one physical
//! medium. The crate ships one adapter per medium:
//!
//! - [`CookieBackend`]: cookie jar model with a per-cookie size limit and max-age.
//! - [`FileBackend`]: the `localStorage` equivalent, one JSON file for all keys.
//! - [`SessionBackend`]: `sessionStorage` area minted by a shared [`SessionStorage`].
//! - [`SqliteBackend`]: the `indexedDB` equivalent (feature `sqlite_backend`).
//! - [`MemoryBackend`]: volatile map; always last in the chain, never fails.
//!
//! Higher layers never talk to an adapter directly: they go through the
//! [`BackendManager`], which tries adapters in the priority order given by
//! `errorHandling.fallbackStorage` and falls back on failure.
//!
//! # Choosing a chain
//!
//! - Browser-like persistence: `["localStorage", "cookie", "memory"]` (the default).
//! - Per-session only: `["sessionStorage", "memory"]`.
//! - Tests: `["memory"]`, or a custom adapter list passed to [`BackendManager::new`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

pub mod cookie;
pub mod file;
pub mod manager;
pub mod memory;
pub mod session;
#[cfg(feature = "sqlite_backend")]
pub mod sqlite;

pub use cookie::CookieBackend;
pub use file::FileBackend;
pub use manager::{BackendManager, BackendSet, WriteReceipt};
pub use memory::MemoryBackend;
pub use session::{SessionBackend, SessionStorage};
#[cfg(feature = "sqlite_backend")]
pub use sqlite::SqliteBackend;

/// The closed set of physical media, named the way the config names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "cookie")]
    Cookie,
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "sessionStorage")]
    SessionStorage,
    #[serde(rename = "indexedDB")]
    IndexedDb,
    #[serde(rename = "memory")]
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Cookie => "cookie",
            BackendKind::LocalStorage => "localStorage",
            BackendKind::SessionStorage => "sessionStorage",
            BackendKind::IndexedDb => "indexedDB",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object-safe adapter around one storage medium.
///
/// Implementations must be internally synchronized. "Backend unavailable" is
/// reported as an `Err`, never as a panic.
pub trait BackendAdapter: Send + Sync {
    /// Which medium this adapter wraps.
    fn kind(&self) -> BackendKind;

    /// Returns the stored value, or `None` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores `value`, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// Shared adapter handle.
pub type AdapterHandle = Arc<dyn BackendAdapter>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_config_names() {
        for kind in [
            BackendKind::Cookie,
            BackendKind::LocalStorage,
            BackendKind::SessionStorage,
            BackendKind::IndexedDb,
            BackendKind::Memory,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert!(crate::config::schema::BACKEND_NAMES.contains(&kind.as_str()));
        }
    }

    #[test]
    fn parse_from_config_name() {
        let kind: BackendKind = serde_json::from_str("\"indexedDB\"").unwrap();
        assert_eq!(kind, BackendKind::IndexedDb);
        assert!(serde_json::from_str::<BackendKind>("\"floppy\"").is_err());
    }
}

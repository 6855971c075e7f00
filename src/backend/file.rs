//! JSON-file backend, the `localStorage` equivalent.
//!
//! `FileBackend` persists **all keys** in a single JSON object on disk, the way
//! `localStorage` keeps one area per origin.
//!
//! ### Design
//! - One file, `{ "key": "value", ... }`, written with sorted keys.
//! - Every `set`/`remove` **reads then rewrites** the whole file, so another
//!   process sharing the file sees the change on its next read. There is no
//!   lock across processes: the last writer wins.
//! - Writes go to a sibling temp file that is then renamed over the original.
//! - A byte quota (default [`DEFAULT_LOCAL_QUOTA`]) bounds the serialized file.
//!
//! ### Failure behavior
//! - A missing file reads as empty.
//! - A corrupt file reads as empty and is logged; the next write replaces it.
//! - I/O errors surface as [`BackendError::Io`] so the manager can fall back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::backend::{BackendAdapter, BackendKind};
use crate::errors::BackendError;

pub const DEFAULT_LOCAL_QUOTA: usize = 5 * 1024 * 1024;

type FileContents = BTreeMap<String, String>;

pub struct FileBackend {
    path: PathBuf,
    quota: usize,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens (or creates) the store file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, serde_json::to_vec(&FileContents::new())?)?;
        }
        Ok(Self {
            path,
            quota: DEFAULT_LOCAL_QUOTA,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_file(&self) -> Result<FileContents, BackendError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileContents::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                log::warn!(target: "locale_store", "ignoring corrupt store file {}: {e}", self.path.display());
                Ok(FileContents::new())
            }
        }
    }

    fn save_file(&self, contents: &FileContents) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(contents).map_err(|e| BackendError::Unavailable {
            backend: BackendKind::LocalStorage,
            reason: e.to_string(),
        })?;
        if bytes.len() > self.quota {
            return Err(BackendError::QuotaExceeded {
                backend: BackendKind::LocalStorage,
                needed: bytes.len(),
                limit: self.quota,
            });
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl BackendAdapter for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalStorage
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.load_file()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut contents = self.load_file()?;
        contents.insert(key.to_string(), value.to_string());
        self.save_file(&contents)
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut contents = self.load_file()?;
        if contents.remove(key).is_some() {
            self.save_file(&contents)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");

        let a = FileBackend::new(&path).unwrap();
        a.set("k", "v").unwrap();
        a.set("j", "w").unwrap();

        let b = FileBackend::new(&path).unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
        b.remove("k").unwrap();
        assert_eq!(a.get("k").unwrap(), None);
        assert_eq!(a.get("j").unwrap().as_deref(), Some("w"));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/local.json");
        let backend = FileBackend::new(&path).unwrap();
        assert!(path.exists());
        assert_eq!(backend.get("anything").unwrap(), None);
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        fs::write(&path, b"{not json").unwrap();

        let backend = FileBackend::new(&path).unwrap();
        assert_eq!(backend.get("k").unwrap(), None);
        backend.set("k", "v").unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn quota_rejects_oversized_writes_and_keeps_old_data() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("local.json")).unwrap().with_quota(64);
        backend.set("k", "small").unwrap();

        let err = backend.set("k", &"x".repeat(100)).unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { limit: 64, .. }));
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("small"));
    }
}

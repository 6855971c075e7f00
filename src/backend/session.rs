use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::backend::{BackendAdapter, BackendKind};
use crate::errors::BackendError;

/// Per-session byte quota, matching what browsers grant `sessionStorage`.
pub const DEFAULT_SESSION_QUOTA: usize = 5 * 1024 * 1024;

type SessionMap = HashMap<Uuid, HashMap<String, String>>;

/// Pool of session areas, one per session id. Dropping a session drops its data.
#[derive(Default, Clone)]
pub struct SessionStorage {
    data: Arc<RwLock<SessionMap>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session and returns its area.
    pub fn open(&self) -> SessionBackend {
        self.area(Uuid::new_v4())
    }

    /// Returns the area for an existing (or new) session id.
    pub fn area(&self, session: Uuid) -> SessionBackend {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session)
            .or_default();
        SessionBackend {
            data: Arc::clone(&self.data),
            session,
            quota: DEFAULT_SESSION_QUOTA,
        }
    }

    pub fn end_session(&self, session: Uuid) {
        self.data.write().unwrap_or_else(PoisonError::into_inner).remove(&session);
    }

    pub fn session_count(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// `sessionStorage` equivalent: a quota-bound area scoped to one session.
pub struct SessionBackend {
    data: Arc<RwLock<SessionMap>>,
    session: Uuid,
    quota: usize,
}

impl SessionBackend {
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = bytes;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    fn ended(&self) -> BackendError {
        BackendError::Unavailable {
            backend: BackendKind::SessionStorage,
            reason: format!("session {} has ended", self.session),
        }
    }
}

impl BackendAdapter for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SessionStorage
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let area = guard.get(&self.session).ok_or_else(|| self.ended())?;
        Ok(area.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let area = guard.get_mut(&self.session).ok_or_else(|| self.ended())?;

        let used: usize = area
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let needed = used + key.len() + value.len();
        if needed > self.quota {
            return Err(BackendError::QuotaExceeded {
                backend: BackendKind::SessionStorage,
                needed,
                limit: self.quota,
            });
        }

        area.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        if let Some(area) = self
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&self.session)
        {
            area.remove(key);
        }
        Ok(())
    }
}

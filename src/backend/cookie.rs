//! Cookie-jar backend.
//!
//! Models what a cookie can hold: each key becomes one cookie, the value is
//! percent-encoded so it survives the `Cookie` header grammar, and the encoded
//! `name=value` pair must fit in [`MAX_COOKIE_BYTES`]. Cookies expire after
//! `max_age_ms`; expiry is enforced lazily on read.
//!
//! ## Notes & limitations
//! - There is no HTTP exchange; [`CookieBackend::cookie_header`] renders the jar
//!   the way it would be sent, for diagnostics only.
//! - Detection histories of more than a handful of records do not fit in one
//!   cookie. That is expected: the manager falls back to the next backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendAdapter, BackendKind};
use crate::clock::ClockHandle;
use crate::errors::BackendError;

/// Per-cookie limit (name + `=` + encoded value) browsers guarantee.
pub const MAX_COOKIE_BYTES: usize = 4096;

/// A cookie as kept in the jar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    /// Percent-encoded value.
    pub value: String,
    pub path: String,
    /// `"Strict"`, `"Lax"` or `"None"`.
    pub same_site: String,
    pub secure: bool,
    /// Epoch ms after which the cookie is gone; `None` for session cookies.
    pub expires_at: Option<i64>,
}

pub struct CookieBackend {
    jar: Mutex<BTreeMap<String, Cookie>>,
    clock: ClockHandle,
    max_age_ms: Option<u64>,
    secure: bool,
}

impl CookieBackend {
    /// Creates a jar whose cookies live for `max_age_ms` (session cookies if `None`).
    pub fn new(clock: ClockHandle, max_age_ms: Option<u64>) -> Self {
        Self {
            jar: Mutex::new(BTreeMap::new()),
            clock,
            max_age_ms,
            secure: true,
        }
    }

    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }

    /// `Cookie` request header for every live cookie, in name order.
    pub fn cookie_header(&self) -> Option<String> {
        let now = self.clock.now_ms();
        let jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        let pairs: Vec<String> = jar
            .values()
            .filter(|c| !is_expired(c, now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

fn is_expired(cookie: &Cookie, now: i64) -> bool {
    cookie.expires_at.is_some_and(|at| at <= now)
}

/// Bytes outside the RFC 6265 cookie-octet set, plus `%` itself.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

fn encode_value(raw: &str) -> String {
    utf8_percent_encode(raw, COOKIE_VALUE).to_string()
}

fn decode_value(encoded: &str) -> Option<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|v| v.into_owned())
}

impl BackendAdapter for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let now = self.clock.now_ms();
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(cookie) = jar.get(key) else {
            return Ok(None);
        };
        if is_expired(cookie, now) {
            jar.remove(key);
            return Ok(None);
        }
        decode_value(&cookie.value)
            .map(Some)
            .ok_or_else(|| BackendError::Unavailable {
                backend: BackendKind::Cookie,
                reason: format!("cookie '{key}' holds a malformed value"),
            })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let encoded = encode_value(value);
        let needed = key.len() + 1 + encoded.len();
        if needed > MAX_COOKIE_BYTES {
            return Err(BackendError::QuotaExceeded {
                backend: BackendKind::Cookie,
                needed,
                limit: MAX_COOKIE_BYTES,
            });
        }

        let expires_at = self
            .max_age_ms
            .map(|age| self.clock.now_ms().saturating_add(age as i64));
        let cookie = Cookie {
            name: key.to_string(),
            value: encoded,
            path: "/".to_string(),
            same_site: "Lax".to_string(),
            secure: self.secure,
            expires_at,
        };
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), cookie);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.jar.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::BackendKind;
use crate::record::LocaleDetectionHistory;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: LocaleDetectionHistory,
    source: Option<BackendKind>,
    loaded_at: i64,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<CacheEntry>,
    generation: u64,
}

/// Single-slot read cache in front of one store key.
///
/// Filled lazily on the first read, dropped on every write, and considered
/// stale once `ttl_ms` has passed since it was filled. A TTL of zero disables
/// caching.
///
/// Every invalidation bumps a generation counter. A reader takes
/// [`generation`](Self::generation) before loading from the backend and hands it
/// to [`put`](Self::put); if a write invalidated the slot in between, the
/// loaded value is already stale and is not cached.
#[derive(Debug, Default)]
pub struct HistoryCache {
    slot: Mutex<Slot>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, now: i64, ttl_ms: u64) -> Option<(LocaleDetectionHistory, Option<BackendKind>)> {
        let mut slot = self.lock();
        match slot.entry.as_ref() {
            Some(entry) if is_fresh(entry.loaded_at, now, ttl_ms) => Some((entry.value.clone(), entry.source)),
            Some(_) => {
                slot.entry = None;
                None
            }
            None => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Fills the slot unless it was invalidated after `seen_generation` was
    /// taken. Returns whether the value was cached.
    pub fn put(&self, value: LocaleDetectionHistory, source: Option<BackendKind>, now: i64, seen_generation: u64) -> bool {
        let mut slot = self.lock();
        if slot.generation != seen_generation {
            return false;
        }
        slot.entry = Some(CacheEntry {
            value,
            source,
            loaded_at: now,
        });
        true
    }

    pub fn invalidate(&self) {
        let mut slot = self.lock();
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
    }

    pub fn is_warm(&self) -> bool {
        self.lock().entry.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_fresh(loaded_at: i64, now: i64, ttl_ms: u64) -> bool {
    ttl_ms > 0 && now.saturating_sub(loaded_at) < ttl_ms as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_expires_after_ttl() {
        let cache = HistoryCache::new();
        cache.put(LocaleDetectionHistory::new(vec![], 5), None, 1_000, 0);
        assert!(cache.get(1_099, 100).is_some());
        assert!(cache.get(1_100, 100).is_none());
        assert!(!cache.is_warm());
    }

    #[test]
    fn zero_ttl_never_serves() {
        let cache = HistoryCache::new();
        cache.put(LocaleDetectionHistory::default(), Some(BackendKind::Memory), 0, 0);
        assert!(cache.get(0, 0).is_none());
    }

    #[test]
    fn invalidate_empties_slot() {
        let cache = HistoryCache::new();
        cache.put(LocaleDetectionHistory::default(), Some(BackendKind::Cookie), 0, 0);
        let (_, source) = cache.get(1, 10).unwrap();
        assert_eq!(source, Some(BackendKind::Cookie));
        cache.invalidate();
        assert!(cache.get(1, 10).is_none());
    }

    #[test]
    fn load_that_raced_a_write_is_not_cached() {
        let cache = HistoryCache::new();
        let seen = cache.generation();
        // a writer lands between the reader's snapshot and its put
        cache.invalidate();
        assert!(!cache.put(LocaleDetectionHistory::new(vec![], 1), None, 0, seen));
        assert!(!cache.is_warm());

        let seen = cache.generation();
        assert!(cache.put(LocaleDetectionHistory::new(vec![], 2), None, 0, seen));
        assert_eq!(cache.get(1, 10).unwrap().0.last_updated, 2);
    }
}

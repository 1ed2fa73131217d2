use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{AnnotationResult, UnitId};

/// Hex SHA-256 of a unit body, used as the content half of the cache key.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    content_hash: String,
    version: u64,
    value: AnnotationResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_evictions: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    stale_evictions: u64,
}

struct Inner {
    entries: Option<LruCache<UnitId, CacheEntry>>,
    counters: Counters,
}

/// Bounded LRU of prior annotation results, one slot per unit. Recency is the
/// order of the underlying list; `get` hits promote the slot.
///
/// A slot is only served when both the content hash and the version tag match
/// what the caller currently sees; anything else is a miss and drops the slot.
/// A capacity of zero disables caching entirely.
pub struct ResultCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: NonZeroUsize::new(max_entries).map(LruCache::new),
                counters: Counters::default(),
            }),
            capacity: max_entries,
        }
    }

    pub fn get(
        &self,
        unit_id: UnitId,
        content_hash: &str,
        version: u64,
    ) -> Option<AnnotationResult> {
        let mut inner = self.inner.lock();
        let Inner { entries, counters } = &mut *inner;
        let Some(entries) = entries.as_mut() else {
            counters.misses += 1;
            return None;
        };

        let lookup = entries.get(&unit_id).map(|entry| {
            (entry.version == version && entry.content_hash == content_hash)
                .then(|| entry.value.clone())
        });
        let fresh = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(&unit_id);
                counters.stale_evictions += 1;
                None
            }
            None => None,
        };

        match fresh {
            Some(value) => {
                counters.hits += 1;
                Some(value)
            }
            None => {
                counters.misses += 1;
                None
            }
        }
    }

    pub fn put(
        &self,
        unit_id: UnitId,
        content_hash: &str,
        version: u64,
        result: AnnotationResult,
    ) {
        let mut inner = self.inner.lock();
        let Inner { entries, counters } = &mut *inner;
        let Some(entries) = entries.as_mut() else {
            return;
        };

        let entry = CacheEntry {
            content_hash: content_hash.to_string(),
            version,
            value: result,
        };
        if let Some((evicted_id, _)) = entries.push(unit_id, entry)
            && evicted_id != unit_id
        {
            counters.evictions += 1;
        }
    }

    pub fn invalidate(&self, unit_id: UnitId) -> bool {
        let mut inner = self.inner.lock();
        inner
            .entries
            .as_mut()
            .is_some_and(|entries| entries.pop(&unit_id).is_some())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if let Some(entries) = inner.entries.as_mut() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .as_ref()
            .map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, unit_id: UnitId) -> bool {
        self.inner
            .lock()
            .entries
            .as_ref()
            .is_some_and(|entries| entries.contains(&unit_id))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let counters = &inner.counters;
        let lookups = counters.hits + counters.misses;
        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            stale_evictions: counters.stale_evictions,
            size: inner.entries.as_ref().map_or(0, LruCache::len),
            capacity: self.capacity,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                counters.hits as f64 / lookups as f64
            },
        }
    }
}

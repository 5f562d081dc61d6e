//! Bounded TTL + LRU cache for short-lived read paths.
//!
//! Expiry is checked lazily on read; [`EphemeralCache::purge_expired`] is an
//! optional sweep for the maintenance loop.

use deck_core::now_ms;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Default capacity when none is configured.
pub const DEFAULT_CACHE_ENTRIES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Option<u64>,
    /// Position in the recency order; larger is more recent.
    tick: u64,
}

/// A key/value store with per-entry TTL and least-recently-used eviction.
#[derive(Debug)]
pub struct EphemeralCache<V> {
    max_entries: usize,
    entries: HashMap<String, Entry<V>>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl<V: Clone> EphemeralCache<V> {
    /// Create a cache holding at most `max_entries` (at least one).
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, now_ms())
    }

    /// Fetch `key`, evicting it if expired and marking it most recently used otherwise.
    pub fn get_at(&mut self, key: &str, now_ms: u64) -> Option<V> {
        let expired = is_expired(self.entries.get(key)?.expires_at, now_ms);
        if expired {
            self.delete(key);
            return None;
        }

        let tick = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(entry.value.clone())
    }

    pub fn set(&mut self, key: &str, value: V, ttl_ms: u64) {
        self.set_at(key, value, ttl_ms, now_ms())
    }

    /// Insert or overwrite `key`. A `ttl_ms` of zero never expires.
    ///
    /// If the insert pushes the cache over capacity, the least recently used
    /// entry is evicted; that is never the key just written.
    pub fn set_at(&mut self, key: &str, value: V, ttl_ms: u64, now_ms: u64) {
        let expires_at = (ttl_ms > 0).then(|| now_ms.saturating_add(ttl_ms));
        let tick = self.bump();
        let previous = self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                tick,
            },
        );
        if let Some(previous) = previous {
            self.recency.remove(&previous.tick);
        }
        self.recency.insert(tick, key.to_string());

        if self.entries.len() > self.max_entries {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Remove `key` if present.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.max_entries,
        }
    }

    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(now_ms())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired_at(&mut self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| is_expired(e.expires_at, now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.delete(key);
        }
        expired.len()
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

fn is_expired(expires_at: Option<u64>, now_ms: u64) -> bool {
    expires_at.is_some_and(|exp| exp < now_ms)
}

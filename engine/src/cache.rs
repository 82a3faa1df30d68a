//! Bounded TTL cache fronting remote read queries.
//!
//! Entries expire lazily: an expired entry is dropped the next time it is
//! looked up (or by [`TtlCache::purge_expired`] housekeeping). When a new key
//! arrives at capacity, the oldest share of entries (by insertion time) is
//! evicted first, always at least one.
//!
//! Keys are plain strings built with [`cache_key`], shaped
//! `"<kind>_<owner>[_<param>...]"`, so every cached query for one resource and
//! owner can be dropped at once with [`TtlCache::invalidate_by_pattern`].

use crate::clock::{add_duration, SharedClock};
use crate::config::CacheConfig;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A cached value with its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    /// When the entry was written (ms since epoch)
    pub inserted_at: Timestamp,
    /// First instant at which the entry is no longer served
    pub expires_at: Timestamp,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, payload: T, now: Timestamp, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload,
            inserted_at: now,
            expires_at: add_duration(now, ttl),
        }
    }

    /// Expired once `now >= expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime in milliseconds, zero once expired.
    pub fn ttl_remaining_ms(&self, now: Timestamp) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    /// Tie-breaker for entries inserted within the same millisecond
    seq: u64,
    entry: CacheEntry<T>,
}

/// Capacity- and time-bounded in-memory cache.
#[derive(Debug)]
pub struct TtlCache<T> {
    entries: HashMap<String, Slot<T>>,
    config: CacheConfig,
    clock: SharedClock,
    next_seq: u64,
    stats: CacheStats,
}

/// The cache as shared between read paths and the sync engine.
pub type SharedCache = Arc<RwLock<TtlCache<serde_json::Value>>>;

impl<T: Clone> TtlCache<T> {
    /// Create an empty cache. `config` should already be validated.
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            clock,
            next_seq: 0,
            stats: CacheStats::default(),
        }
    }

    /// Wrap a cache in the shared handle used by the engine.
    pub fn shared(config: CacheConfig, clock: SharedClock) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self::new(config, clock)))
    }

    /// Look up a live entry. An expired entry is removed and reported absent.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(slot) if !slot.entry.is_expired(now) => {
                self.stats.hits += 1;
                Some(slot.entry.payload.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                self.stats.expirations += 1;
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up the whole entry without touching statistics or expiry.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    /// Insert with the configured default TTL.
    pub fn set(&mut self, key: impl Into<String>, value: T) {
        let ttl = self.config.default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    /// Insert with an explicit TTL. Overwriting an existing key never evicts.
    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }

        let now = self.clock.now_ms();
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = CacheEntry::new(key.clone(), value, now, ttl);
        self.entries.insert(key, Slot { seq, entry });
    }

    /// Drop one key. Returns whether it was present.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every key containing `pattern` as a substring.
    pub fn invalidate_by_pattern(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(pattern));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(pattern, removed, "cache entries invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.entry.is_expired(now));
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of entries evicted from a full cache of `len` entries.
    fn eviction_batch(&self, len: usize) -> usize {
        let batch = (len as f64 * self.config.eviction_fraction).floor() as usize;
        batch.clamp(1, len.max(1))
    }

    fn evict_oldest(&mut self) {
        let batch = self.eviction_batch(self.entries.len());

        let mut by_age: Vec<(Timestamp, u64, String)> = self
            .entries
            .iter()
            .map(|(key, slot)| (slot.entry.inserted_at, slot.seq, key.clone()))
            .collect();
        by_age.sort_unstable();

        for (_, _, key) in by_age.into_iter().take(batch) {
            self.entries.remove(&key);
        }
        self.stats.evictions += batch as u64;
        tracing::debug!(evicted = batch, remaining = self.entries.len(), "cache full");
    }
}

/// Build a cache key from a resource kind, an owner, and query parameters.
///
/// `cache_key("diaries", "user1", &[("page", "2")])` is `"diaries_user1_page=2"`.
pub fn cache_key(kind: &str, owner: &str, params: &[(&str, &str)]) -> String {
    let mut key = owner_pattern(kind, owner);
    for (name, value) in params {
        key.push('_');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

/// The substring shared by every key of one resource kind and owner.
///
/// Matching is by substring, so `"diaries_user1"` also covers
/// `"diaries_user10"`; over-invalidation only costs a refetch.
pub fn owner_pattern(kind: &str, owner: &str) -> String {
    format!("{kind}_{owner}")
}

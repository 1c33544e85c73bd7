//! Namespaced in-memory cache with per-namespace TTL and capacity.
//!
//! The cache memoizes expensive reads (statistics, listings, ledger rows). It
//! is never a source of truth: a miss always falls back to recomputing.
//!
//! Each namespace carries a [`CachePolicy`]. When a namespace reaches its
//! capacity, expired entries are swept first; if the namespace is still full,
//! the least recently accessed quarter of its entries is evicted.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Serialize;

use crate::config::IngestConfig;

/// Namespace for the ticker listing.
pub const QUOTES_LIST: &str = "quotes_list";
/// Namespace for the most recent trade date.
pub const QUOTES_LAST_DATE: &str = "quotes_last_date";
/// Namespace for aggregate quote statistics.
pub const QUOTES_STATS: &str = "quotes_stats";
/// Namespace for ledger rows and listings.
pub const PROCESSED_FILES: &str = "processed_files";

/// Expiry and capacity settings for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_size: usize,
}

impl CachePolicy {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 1000)
    }
}

/// Entries are keyed by `(namespace, key)`.
type EntryKey = (String, String);

fn entry_key(namespace: &str, key: &str) -> EntryKey {
    (namespace.to_string(), key.to_string())
}

#[derive(Clone)]
struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn new(value: Arc<dyn Any + Send + Sync>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }

    fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    /// Hit ratio in percent.
    pub hit_ratio: f64,
    pub namespaces: HashMap<String, usize>,
}

/// Invalidation counters observed before an uncached computation.
///
/// A computed value is only stored if neither counter moved in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    epoch: u64,
    namespace: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<EntryKey, CacheEntry>,
    /// Live entry count per namespace.
    counts: HashMap<String, usize>,
    policies: HashMap<String, CachePolicy>,
    /// Bumped by every invalidation of a namespace.
    generations: HashMap<String, u64>,
    /// Bumped by `clear`.
    epoch: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn policy_for(&self, namespace: &str, fallback: CachePolicy) -> CachePolicy {
        self.policies.get(namespace).copied().unwrap_or(fallback)
    }

    fn namespace_len(&self, namespace: &str) -> usize {
        self.counts.get(namespace).copied().unwrap_or(0)
    }

    fn generation(&self, namespace: &str) -> Generation {
        Generation {
            epoch: self.epoch,
            namespace: self.generations.get(namespace).copied().unwrap_or(0),
        }
    }

    fn bump_generation(&mut self, namespace: &str) {
        *self.generations.entry(namespace.to_string()).or_insert(0) += 1;
    }

    fn remove(&mut self, key: &EntryKey) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        if let Some(count) = self.counts.get_mut(&key.0) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&key.0);
            }
        }
        true
    }

    fn insert(&mut self, key: EntryKey, entry: CacheEntry) {
        let namespace = key.0.clone();
        if self.entries.insert(key, entry).is_none() {
            *self.counts.entry(namespace).or_insert(0) += 1;
        }
    }

    /// Recounts `namespace` after a bulk removal.
    fn recount(&mut self, namespace: &str) {
        let count = self.entries.keys().filter(|(ns, _)| ns == namespace).count();
        if count == 0 {
            self.counts.remove(namespace);
        } else {
            self.counts.insert(namespace.to_string(), count);
        }
    }

    /// Makes room for one more entry in `namespace`. Returns the number evicted.
    fn make_room(&mut self, namespace: &str, max_size: usize, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(ns, _), e| ns != namespace || !e.is_expired(now));
        let mut evicted = before - self.entries.len();
        self.recount(namespace);

        let remaining = self.namespace_len(namespace);
        if remaining >= max_size {
            let mut candidates: Vec<(EntryKey, Instant)> = self
                .entries
                .iter()
                .filter(|((ns, _), _)| ns == namespace)
                .map(|(k, e)| (k.clone(), e.last_accessed))
                .collect();
            candidates.sort_by_key(|(_, accessed)| *accessed);

            let to_remove = remaining.div_ceil(4).max(1);
            for (key, _) in candidates.into_iter().take(to_remove) {
                if self.remove(&key) {
                    evicted += 1;
                }
            }
        }

        self.evictions += evicted as u64;
        evicted
    }

    fn store(&mut self, namespace: &str, key: String, value: Arc<dyn Any + Send + Sync>, fallback: CachePolicy) {
        let full_key = (namespace.to_string(), key);
        let now = Instant::now();
        let policy = self.policy_for(namespace, fallback);

        if !self.entries.contains_key(&full_key) && self.namespace_len(namespace) >= policy.max_size {
            let evicted = self.make_room(namespace, policy.max_size, now);
            debug!("Evicted {} entries from cache namespace {}", evicted, namespace);
        }

        self.insert(full_key, CacheEntry::new(value, policy.ttl));
    }
}

/// Process-wide cache shared by the quote store and the ledger.
///
/// A single mutex guards every operation. Lookups and inserts are O(1); the
/// O(n) sweep only runs when a namespace hits capacity or is invalidated.
pub struct Cache {
    state: Mutex<CacheState>,
    default_policy: CachePolicy,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl Cache {
    /// Creates an empty cache. `default_policy` applies to unregistered namespaces.
    pub fn new(default_policy: CachePolicy) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            default_policy,
        }
    }

    /// Creates a cache with the policies used by the quote store and ledger.
    pub fn with_standard_policies(default_policy: CachePolicy) -> Self {
        let cache = Self::new(default_policy);
        cache.register_policy(QUOTES_LIST, CachePolicy::new(Duration::from_secs(3600), 100));
        cache.register_policy(QUOTES_LAST_DATE, CachePolicy::new(Duration::from_secs(600), 10));
        cache.register_policy(QUOTES_STATS, CachePolicy::new(Duration::from_secs(1800), 10));
        cache.register_policy(PROCESSED_FILES, CachePolicy::new(Duration::from_secs(1800), 200));
        cache
    }

    /// Standard policies, with the configured fallback for other namespaces.
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::with_standard_policies(CachePolicy::new(
            config.cache_default_ttl,
            config.cache_default_max_size,
        ))
    }

    /// Lock the state, recovering from poisoning if a previous holder panicked.
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn register_policy(&self, namespace: &str, policy: CachePolicy) {
        self.lock_state()
            .policies
            .insert(namespace.to_string(), policy);
    }

    pub fn policy(&self, namespace: &str) -> CachePolicy {
        self.lock_state().policy_for(namespace, self.default_policy)
    }

    /// Returns the cached value, or `None` on a miss.
    ///
    /// An entry older than its TTL is removed and counted as a miss.
    pub fn get<T>(&self, namespace: &str, key: impl Display) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let full_key = entry_key(namespace, &key.to_string());
        let now = Instant::now();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let Some(entry) = state.entries.get_mut(&full_key) else {
            state.misses += 1;
            return None;
        };

        if entry.is_expired(now) {
            state.remove(&full_key);
            state.evictions += 1;
            state.misses += 1;
            return None;
        }

        entry.touch(now);
        match entry.value.downcast_ref::<T>() {
            Some(value) => {
                state.hits += 1;
                Some(value.clone())
            }
            None => {
                debug!("Cache entry {}:{} holds a different type", full_key.0, full_key.1);
                state.misses += 1;
                None
            }
        }
    }

    /// Stores a value, evicting from the namespace first if it is full.
    pub fn set<T>(&self, namespace: &str, key: impl Display, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.lock_state()
            .store(namespace, key.to_string(), Arc::new(value), self.default_policy);
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// Errors from `compute` are returned as-is and nothing is cached. A value
    /// computed while its namespace was invalidated is returned but not stored.
    pub fn get_or_compute<T, E, F>(&self, namespace: &str, key: impl Display, compute: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let key = key.to_string();
        if let Some(hit) = self.get::<T>(namespace, &key) {
            return Ok(hit);
        }
        let observed = self.lock_state().generation(namespace);

        // Computed outside the lock so slow reads don't block other callers.
        let value = compute()?;

        let mut state = self.lock_state();
        if state.generation(namespace) == observed {
            state.store(namespace, key, Arc::new(value.clone()), self.default_policy);
        } else {
            debug!("Discarding stale value for {}:{}", namespace, key);
        }
        Ok(value)
    }

    /// Removes one entry, or the whole namespace when `key` is `None`.
    pub fn invalidate(&self, namespace: &str, key: Option<&str>) {
        let mut state = self.lock_state();
        state.bump_generation(namespace);
        match key {
            Some(k) => {
                state.remove(&entry_key(namespace, k));
            }
            None => {
                state.entries.retain(|(ns, _), _| ns != namespace);
                state.counts.remove(namespace);
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.counts.clear();
        state.epoch += 1;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        let lookups = state.hits + state.misses;
        let hit_ratio = if lookups > 0 {
            state.hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len(),
            hit_ratio,
            namespaces: state.counts.clone(),
        }
    }

    #[cfg(test)]
    fn age_entry(&self, namespace: &str, key: &str, by: Duration) {
        let mut state = self.lock_state();
        if let Some(entry) = state.entries.get_mut(&entry_key(namespace, key)) {
            entry.created_at -= by;
            entry.last_accessed -= by;
        }
    }
}

//! Lookup memoization for gateway round trips.
//!
//! One [`LookupCache`] lives inside each resolver instance. It is never
//! process-wide: a new resolver starts empty, so resolvers for different
//! subjects can run in parallel without sharing state.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Key for per-subject lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    /// The subject the lookup is for.
    pub subject_id: String,
    /// The visit the lookup is for; `None` for the subject lookup itself.
    pub visit_id: Option<String>,
}

impl LookupKey {
    /// Key for a subject lookup.
    pub fn subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            visit_id: None,
        }
    }

    /// Key for a (subject, visit) lookup.
    pub fn visit(subject_id: impl Into<String>, visit_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            visit_id: Some(visit_id.into()),
        }
    }
}

struct CacheState<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    hits: usize,
    fetches: usize,
}

/// Memoizes fetched values by key.
///
/// With the default unbounded capacity the wrapped fetch runs at most once per
/// distinct key for the cache's lifetime. A bounded cache evicts the least
/// recently used entry when full, after which an evicted key is fetched again.
///
/// Failed fetches are not memoized.
///
/// # Example
///
/// ```
/// use soa_window_resolver::LookupCache;
///
/// let cache: LookupCache<&str, u32> = LookupCache::unbounded();
/// let first: Result<u32, ()> = cache.get_or_fetch("k", || Ok(1));
/// let second: Result<u32, ()> = cache.get_or_fetch("k", || Ok(2));
/// assert_eq!(first, Ok(1));
/// assert_eq!(second, Ok(1));
/// assert_eq!(cache.stats().fetches, 1);
/// ```
pub struct LookupCache<K: Hash + Eq, V> {
    inner: Mutex<CacheState<K, V>>,
    capacity: Option<NonZeroUsize>,
}

impl<K: Hash + Eq + Clone, V: Clone> LookupCache<K, V> {
    /// Creates a cache that never evicts.
    pub fn unbounded() -> Self {
        Self {
            inner: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                hits: 0,
                fetches: 0,
            }),
            capacity: None,
        }
    }

    /// Creates a cache holding at most `max_entries` values.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn bounded(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                fetches: 0,
            }),
            capacity: Some(capacity),
        }
    }

    /// Creates a cache from an optional capacity (`None` = unbounded).
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(max_entries) => Self::bounded(max_entries),
            None => Self::unbounded(),
        }
    }

    /// Returns the memoized value for `key`, running `fetch` on a miss.
    ///
    /// The lock is held across the fetch, so concurrent callers for the same
    /// cache never fetch the same key twice.
    pub fn get_or_fetch<E, F>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut state = self.inner.lock();
        if let Some(value) = state.entries.get(&key) {
            let value = value.clone();
            state.hits += 1;
            return Ok(value);
        }

        state.fetches += 1;
        let value = fetch()?;
        state.entries.put(key, value.clone());
        Ok(value)
    }

    /// Gets a memoized value without fetching.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.peek(key).cloned()
    }

    /// Checks if a key is memoized (without affecting LRU order).
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Returns the number of memoized entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured capacity (`None` = unbounded).
    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    /// Returns hit and fetch counters.
    pub fn stats(&self) -> LookupStats {
        let state = self.inner.lock();
        LookupStats {
            entries: state.entries.len(),
            hits: state.hits,
            fetches: state.fetches,
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for LookupCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("LookupCache")
            .field("entries", &state.entries.len())
            .field("capacity", &self.capacity)
            .field("hits", &state.hits)
            .field("fetches", &state.fetches)
            .finish()
    }
}

/// Counters describing cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    /// Number of memoized entries.
    pub entries: usize,
    /// Lookups served from the cache.
    pub hits: usize,
    /// Lookups that ran the fetch (gateway round trips).
    pub fetches: usize,
}

impl LookupStats {
    /// Returns the hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.fetches;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

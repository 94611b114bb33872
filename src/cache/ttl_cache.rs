//! Bounded LRU cache with per-entry TTL and instrumentation
//!
//! Expired entries stay resident until they are evicted (LRU pressure,
//! [`TtlCache::purge_expired`] or [`TtlCache::clear`]); a lookup that finds
//! one counts as a miss and reports the expiry exactly once.

use super::statistics::CacheObserver;
use crate::memory::CleanupTarget;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct TtlEntry<V> {
    value: V,
    /// `None` when the TTL is too long to represent, i.e. never expires
    expires_at: Option<Instant>,
    expiry_reported: bool,
}

impl<V> TtlEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

enum Lookup<V> {
    Missing,
    Expired { newly: bool },
    Hit(V),
}

/// TTL-aware LRU cache reporting to a [`CacheObserver`]
pub struct TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    name: String,
    entries: Mutex<LruCache<K, TtlEntry<V>>>,
    default_ttl: Duration,
    observer: Arc<dyn CacheObserver>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(
        name: impl Into<String>,
        max_entries: usize,
        default_ttl: Duration,
        observer: Arc<dyn CacheObserver>,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            observer,
        }
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let lookup = match entries.peek_mut(key) {
            None => Lookup::Missing,
            Some(entry) if entry.is_expired(now) => {
                let newly = !entry.expiry_reported;
                entry.expiry_reported = true;
                Lookup::Expired { newly }
            }
            Some(entry) => Lookup::Hit(entry.value.clone()),
        };

        match lookup {
            Lookup::Hit(value) => {
                entries.promote(key);
                self.observer.on_hit();
                Some(value)
            }
            Lookup::Expired { newly } => {
                if newly {
                    self.observer.on_expiry();
                }
                self.observer.on_miss();
                None
            }
            Lookup::Missing => {
                self.observer.on_miss();
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = TtlEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
            expiry_reported: false,
        };

        let displaced = self.entries.lock().push(key, entry);

        // `push` hands back either the replaced entry or the LRU victim
        if let Some((_, old)) = displaced {
            self.observer.on_eviction(old.expiry_reported);
        }
        self.observer.on_insert();
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.entries.lock().pop(key)?;
        self.observer.on_eviction(removed.expiry_reported);
        Some(removed.value)
    }

    /// Evict every entry past its TTL. Returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = entries.pop(key) {
                if !entry.expiry_reported {
                    self.observer.on_expiry();
                }
                self.observer.on_eviction(true);
            }
        }

        expired.len()
    }

    /// Evict everything. Returns the number evicted.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        while let Some((_, entry)) = entries.pop_lru() {
            self.observer.on_eviction(entry.expiry_reported);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<K, V> CleanupTarget for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&self) -> u64 {
        self.clear() as u64
    }
}

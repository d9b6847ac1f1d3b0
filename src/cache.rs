//! Per-process TTL cache with lazy expiry.
//!
//! Entries are stamped with a monotonic deadline and checked on read; there
//! is no sweeper. Expired entries are dropped when they are next read or
//! overwritten. The cache bounds staleness of repeated lookups, it is never
//! a source of truth and is never shared across processes.

use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    name: &'static str,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// `name` labels the hit/miss metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The cached value, or `None` if absent or past its deadline.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let hit = match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        let result = if hit.is_some() { "hit" } else { "miss" };
        metrics::cache_lookups().add(
            1,
            &[
                KeyValue::new("cache", self.name),
                KeyValue::new("result", result),
            ],
        );
        hit
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.lock().insert(key, Entry { value, expires_at });
    }

    /// Return the cached value or compute, store and return a fresh one.
    ///
    /// The lock is not held while `compute` runs, so concurrent misses on the
    /// same key may each compute; the last write wins.
    pub async fn get_or_insert_with<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute().await;
        self.set(key, value.clone(), ttl);
        value
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Entries currently stored, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! TTL Cache
//!
//! String-keyed cache with lazy expiry: an entry is served until `ttl` has
//! elapsed since insertion and treated as absent from then on. There is no
//! background sweep; expired entries are dropped when read.
//!
//! The map is concurrent, and `get_or_try_insert_with` is single-flight per
//! key so two concurrent misses never both run the loader.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub struct TtlCache<V> {
    ttl: Duration,
    entries: DashMap<String, (Instant, V)>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Read as of `now`. Fresh strictly before `inserted_at + ttl`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        match self.entries.get(key) {
            None => return None,
            Some(entry) => {
                let (inserted_at, value) = entry.value();
                if now.saturating_duration_since(*inserted_at) < self.ttl {
                    return Some(value.clone());
                }
            }
        }
        let ttl = self.ttl;
        self.entries.remove_if(key, |_, (inserted_at, _)| {
            now.saturating_duration_since(*inserted_at) >= ttl
        });
        debug!("Cache entry '{}' expired", key);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: impl Into<String>, value: V, now: Instant) {
        self.entries.insert(key.into(), (now, value));
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached value or run `init` to produce it. Concurrent callers
    /// for the same key wait for the first loader instead of running their own.
    /// Errors are returned to the caller that ran the loader and are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            debug!("Cache hit for '{}'", key);
            return Ok(value);
        }

        // Declared before the slot and its lock so it drops after both, also
        // when the caller's future is cancelled mid-load.
        let _cleanup = InFlightCleanup {
            in_flight: &self.in_flight,
            key,
        };
        let slot = {
            let entry = self
                .in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };

        let _guard = slot.lock().await;
        if let Some(value) = self.get(key) {
            debug!("Cache filled by concurrent loader for '{}'", key);
            return Ok(value);
        }
        debug!("Cache miss for '{}'", key);
        let loaded = init().await;
        if let Ok(value) = &loaded {
            self.insert(key, value.clone());
        }
        loaded
    }
}

/// Removes the per-key loader slot once no other caller holds it.
struct InFlightCleanup<'a> {
    in_flight: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
}

impl Drop for InFlightCleanup<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

// ── In-memory TTL cache ──
//
// Key→value store with per-entry expiry. Expired entries are invisible to
// readers immediately and physically removed by a periodic sweep.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::schedule::ScheduledTask;

#[derive(Debug)]
struct Entry<V> {
    expires_at: Instant,
    value: V,
}

/// Cheaply cloneable handle to a shared TTL cache.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    /// Live value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, e)| e.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!(removed, "cache sweep");
        }
        removed
    }

    /// Sweep every `period` for as long as the returned task is held.
    pub fn spawn_sweeper(&self, period: Duration) -> ScheduledTask {
        let cache = self.clone();
        ScheduledTask::interval(period, move || {
            cache.sweep();
            std::future::ready(())
        })
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, time-expiring caches used by transaction naming.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(20 * 60);

/// When an entry's lifetime restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    AfterWrite,
    AfterAccess,
}

struct Entry<V> {
    value: V,
    touched_at: Instant,
}

/// Thread-safe LRU cache whose entries also expire after a fixed time.
///
/// A miss never means the value is wrong, only that it has to be computed again.
pub struct ExpiringCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    expiry: Expiry,
}

impl<K: Hash + Eq, V: Clone> ExpiringCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration, expiry: Expiry) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            expiry,
        }
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if now.saturating_duration_since(entry.touched_at) > self.ttl {
            entries.pop(key);
            return None;
        }
        if self.expiry == Expiry::AfterAccess {
            entry.touched_at = now;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, Instant::now());
    }

    fn put_at(&self, key: K, value: V, now: Instant) {
        self.entries.lock().put(
            key,
            Entry {
                value,
                touched_at: now,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

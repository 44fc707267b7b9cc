// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

/// A cached value with the metadata expiration decisions need.
///
/// Backends store entries opaquely; the owning cache stamps [`cached_at`][Self::cached_at]
/// on insert and checks expiration on lookup, so time stays under the cache's clock and
/// out of the backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    cached_at: Option<Instant>,
    // Per-entry TTL override; takes precedence over the cache-level TTL.
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    /// Creates an entry with the given value and no timestamp.
    ///
    /// The timestamp is set by the cache when the entry is inserted.
    pub fn new(value: V) -> Self {
        Self {
            value,
            cached_at: None,
            ttl: None,
        }
    }

    /// Creates an entry with a per-entry TTL that overrides the cache-level TTL.
    pub fn with_ttl(value: V, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: None,
            ttl: Some(ttl),
        }
    }

    /// Borrows the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry, returning the cached value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// When the entry was inserted, if it has been inserted.
    #[must_use]
    pub fn cached_at(&self) -> Option<Instant> {
        self.cached_at
    }

    /// Stamps the insertion time; called by the cache on insert.
    pub fn set_cached_at(&mut self, cached_at: Instant) {
        self.cached_at = Some(cached_at);
    }

    /// The per-entry TTL, if set.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Whether the entry has outlived its TTL at `now`.
    ///
    /// Entries without a timestamp or without any applicable TTL never expire.
    #[must_use]
    pub fn is_expired(&self, now: Instant, cache_ttl: Option<Duration>) -> bool {
        match (self.cached_at, self.ttl.or(cache_ttl)) {
            (Some(at), Some(ttl)) => now.saturating_duration_since(at) >= ttl,
            _ => false,
        }
    }
}

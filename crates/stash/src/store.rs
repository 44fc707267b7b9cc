// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The trait cache backends implement.

use async_trait::async_trait;

use crate::{CacheEntry, StoreError};

/// Storage operations a cache backend provides.
///
/// Implement this trait to plug a custom backend into [`CommandCache`][crate::CommandCache].
/// Backends store entries opaquely — expiration, hooks, and enable gates are the owning
/// cache's concern.
///
/// `keys` feeds diagnostics ([`CommandCache::dump`][crate::CommandCache::dump]); backends
/// that cannot enumerate (e.g. remote caches) return an empty list.
#[async_trait]
pub trait CacheStore<V>: Send + Sync {
    /// Gets the entry for a key, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, StoreError>;

    /// Inserts an entry, replacing any existing entry for the key.
    async fn put(&self, key: &str, entry: CacheEntry<V>) -> Result<(), StoreError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<(), StoreError>;

    /// The keys currently present, for diagnostics. Best-effort; may be empty for
    /// backends that cannot enumerate.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// The number of entries, if the backend tracks it.
    fn len(&self) -> Option<u64> {
        None
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use async_trait::async_trait;
use moka::future::Cache;

use crate::{CacheEntry, CacheStore, StoreError};

/// A size-bounded in-memory backend.
///
/// Backed by [`moka`], which evicts on a recency/frequency policy once the capacity is
/// reached. Expiration stays with the owning cache's clock (see
/// [`CacheConfig::ttl`][crate::CacheConfig]), so controlled-time tests observe TTLs
/// deterministically.
#[derive(Debug)]
pub struct BoundedStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<String, CacheEntry<V>>,
}

impl<V> BoundedStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store that holds at most `max_capacity` entries.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_capacity).build(),
        }
    }
}

#[async_trait]
impl<V> CacheStore<V> for BoundedStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, StoreError> {
        Ok(self.inner.get(key).await)
    }

    async fn put(&self, key: &str, entry: CacheEntry<V>) -> Result<(), StoreError> {
        self.inner.insert(key.to_owned(), entry).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.iter().map(|(k, _)| (*k).clone()).collect())
    }

    fn len(&self) -> Option<u64> {
        // Approximate until pending maintenance runs; good enough for diagnostics.
        Some(self.inner.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = BoundedStore::new(16);

        store.put("k", CacheEntry::new("v")).await.unwrap();

        assert_eq!(*store.get("k").await.unwrap().unwrap().value(), "v");
    }

    #[tokio::test]
    async fn clear_removes_entries() {
        let store = BoundedStore::new(16);
        store.put("k", CacheEntry::new(1)).await.unwrap();

        store.clear().await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capacity_bounds_entry_count() {
        let store = BoundedStore::new(8);

        for i in 0..64 {
            store.put(&format!("k{i}"), CacheEntry::new(i)).await.unwrap();
        }
        store.inner.run_pending_tasks().await;

        assert!(store.inner.entry_count() <= 8);
    }
}

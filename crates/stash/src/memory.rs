// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{CacheEntry, CacheStore, StoreError};

/// An unbounded in-memory backend over a hash map.
///
/// Entries are never evicted; pair with a TTL in
/// [`CacheConfig`][crate::CacheConfig] or use [`BoundedStore`][crate::BoundedStore]
/// when growth must be limited.
#[derive(Debug, Default)]
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> MemoryStore<V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry<V>) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn len(&self) -> Option<u64> {
        Some(self.entries.read().len() as u64)
    }
}

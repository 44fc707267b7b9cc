// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{CacheEntry, CacheStore, StoreError};

/// The contract an external distributed cache fulfills.
///
/// The client is a collaborator owned by the application; this crate only defines the
/// operations the [`RemoteStore`] adapter needs. The external server is assumed
/// authoritative for its contents, so caches bound to a remote store are built with
/// [`CacheConfig::remote`][crate::CacheConfig::remote], which disables puts.
#[async_trait]
pub trait RemoteCacheClient<V>: Send + Sync {
    /// Fetches the value for a key from the named external cache.
    async fn fetch(&self, cache: &str, key: &str) -> Result<Option<V>, StoreError>;

    /// Stores a value into the named external cache.
    async fn store(&self, cache: &str, key: &str, value: V) -> Result<(), StoreError>;

    /// Purges the named external cache.
    async fn purge(&self, cache: &str) -> Result<(), StoreError>;
}

/// Adapter presenting an external distributed cache as a [`CacheStore`].
///
/// Entry metadata stays local: values fetched from the remote side are wrapped in
/// unstamped entries, so local TTL gating does not apply to them — the server decides
/// expiry.
pub struct RemoteStore<V> {
    client: Arc<dyn RemoteCacheClient<V>>,
    external_name: String,
}

impl<V> RemoteStore<V> {
    /// Creates an adapter over `client`, addressing the external cache `external_name`.
    pub fn new(client: Arc<dyn RemoteCacheClient<V>>, external_name: impl Into<String>) -> Self {
        Self {
            client,
            external_name: external_name.into(),
        }
    }

    /// The name of the external cache this adapter addresses.
    #[must_use]
    pub fn external_name(&self) -> &str {
        &self.external_name
    }
}

#[async_trait]
impl<V> CacheStore<V> for RemoteStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, StoreError> {
        Ok(self
            .client
            .fetch(&self.external_name, key)
            .await?
            .map(CacheEntry::new))
    }

    async fn put(&self, key: &str, entry: CacheEntry<V>) -> Result<(), StoreError> {
        self.client
            .store(&self.external_name, key, entry.into_value())
            .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.client.purge(&self.external_name).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        // Remote caches cannot be enumerated through this contract.
        Ok(Vec::new())
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::CommandCache;

/// Type-erased management operations every cache offers.
///
/// The registry keeps caches under this trait so heterogeneously-typed caches can be
/// purged and inspected together; typed access goes through [`CacheRegistry::get`].
#[async_trait]
pub trait CacheAdmin: Send + Sync {
    /// The unique name of the cache.
    fn name(&self) -> &str;

    /// Purges every entry.
    async fn empty(&self);

    /// Renders the cache contents for diagnostics.
    async fn dump(&self) -> String;
}

#[async_trait]
impl<F, T> CacheAdmin for CommandCache<F, T>
where
    F: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        CommandCache::name(self)
    }

    async fn empty(&self) {
        CommandCache::empty(self).await;
    }

    async fn dump(&self) -> String {
        CommandCache::dump(self).await
    }
}

struct Registration {
    typed: Arc<dyn Any + Send + Sync>,
    admin: Arc<dyn CacheAdmin>,
}

/// A process-wide registry of named caches.
///
/// Caches are shared by every command binding the same name; the first registration
/// wins and later registrations under a taken name are rejected. The registry is an
/// explicit object owned by its creator — there is no hidden global.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, Registration>>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cache under its name.
    ///
    /// Returns `false` (leaving the existing cache in place) if the name is taken.
    pub fn register<F, T>(&self, cache: Arc<CommandCache<F, T>>) -> bool
    where
        F: Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let name = cache.name().to_owned();
        let mut caches = self.caches.write();

        if caches.contains_key(&name) {
            tracing::warn!(cache = %name, "cache name already registered; keeping existing cache");
            return false;
        }

        caches.insert(
            name,
            Registration {
                typed: Arc::clone(&cache) as Arc<dyn Any + Send + Sync>,
                admin: cache,
            },
        );
        true
    }

    /// Retrieves a cache by name with its concrete types.
    ///
    /// Returns `None` when the name is unknown or registered with different types.
    #[must_use]
    pub fn get<F, T>(&self, name: &str) -> Option<Arc<CommandCache<F, T>>>
    where
        F: Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let caches = self.caches.read();
        let registration = caches.get(name)?;
        Arc::clone(&registration.typed).downcast::<CommandCache<F, T>>().ok()
    }

    /// Retrieves the management handle for a cache by name.
    #[must_use]
    pub fn admin(&self, name: &str) -> Option<Arc<dyn CacheAdmin>> {
        self.caches.read().get(name).map(|r| Arc::clone(&r.admin))
    }

    /// The names of every registered cache.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    /// Purges every registered cache.
    pub async fn empty_all(&self) {
        let admins: Vec<_> = self.caches.read().values().map(|r| Arc::clone(&r.admin)).collect();
        for admin in admins {
            admin.empty().await;
        }
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry").field("names", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use metronome::Clock;

    use crate::{CacheConfig, Lookup, MemoryStore};

    use super::*;

    fn new_cache(name: &str) -> Arc<CommandCache<i32, i32>> {
        Arc::new(CommandCache::new(
            name,
            Arc::new(MemoryStore::new()),
            Clock::new_frozen(),
            CacheConfig::default(),
        ))
    }

    #[test]
    fn register_then_get_typed() {
        let registry = CacheRegistry::new();
        assert!(registry.register(new_cache("a")));

        assert!(registry.get::<i32, i32>("a").is_some());
        assert!(registry.get::<i32, i32>("b").is_none());
    }

    #[test]
    fn wrong_types_do_not_downcast() {
        let registry = CacheRegistry::new();
        registry.register(new_cache("a"));

        assert!(registry.get::<String, String>("a").is_none());
    }

    #[test]
    fn first_registration_wins() {
        let registry = CacheRegistry::new();
        let first = new_cache("a");

        assert!(registry.register(Arc::clone(&first)));
        assert!(!registry.register(new_cache("a")));

        let resolved = registry.get::<i32, i32>("a").unwrap();
        assert!(Arc::ptr_eq(&resolved, &first));
    }

    #[tokio::test]
    async fn empty_all_purges_every_cache() {
        let registry = CacheRegistry::new();
        let a = new_cache("a");
        let b = new_cache("b");
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));

        a.put("k", &1).await;
        b.put("k", &2).await;

        registry.empty_all().await;

        assert_eq!(a.get("k").await, Lookup::Miss);
        assert_eq!(b.get("k").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn admin_handle_reaches_cache() {
        let registry = CacheRegistry::new();
        registry.register(new_cache("a"));

        let admin = registry.admin("a").unwrap();
        assert_eq!(admin.name(), "a");
        assert!(admin.dump().await.starts_with("a [entries=0]"));
    }
}

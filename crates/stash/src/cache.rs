// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use metronome::Clock;

use crate::{BoundedStore, CacheEntry, CacheStore, Lookup, MemoryStore, StoreError};

/// Dumps longer than this are cut off; diagnostics should not become payloads.
const DUMP_MAX_LEN: usize = 2048;

const DEFAULT_BOUNDED_CAPACITY: u64 = 10_000;

/// Configuration for a [`CommandCache`].
///
/// `enabled` gates lookups and stores entirely; `put_enabled` gates only stores, for
/// caches whose backend is authoritative and must not be written by clients (see
/// [`CacheConfig::remote`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether the cache participates at all. Disabled caches miss on every get and
    /// skip every put.
    pub enabled: bool,

    /// Whether values are stored after successful commands.
    pub put_enabled: bool,

    /// Capacity for size-bounded backends.
    pub max_size: Option<u64>,

    /// Cache-level TTL; entries older than this read as misses. A per-entry TTL
    /// overrides it.
    pub ttl: Option<Duration>,

    /// Name of the external cache for remote backends.
    pub external_name: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            put_enabled: true,
            max_size: None,
            ttl: None,
            external_name: None,
        }
    }
}

impl CacheConfig {
    /// The configuration for a cache over an authoritative external backend, such as
    /// a [`RemoteStore`][crate::RemoteStore]: puts are disabled, since the server
    /// owns the contents and local results must not be written back to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use stash::CacheConfig;
    ///
    /// let config = CacheConfig::remote("orders");
    /// assert!(!config.put_enabled);
    /// assert_eq!(config.external_name.as_deref(), Some("orders"));
    /// ```
    #[must_use]
    pub fn remote(external_name: impl Into<String>) -> Self {
        Self {
            put_enabled: false,
            external_name: Some(external_name.into()),
            ..Self::default()
        }
    }

    /// Parses a `k=v,k=v` backend config string.
    ///
    /// Recognized keys: `enabled`, `putEnabled`, `maxSize`, `ttlMs`, `externalName`.
    /// Unknown keys and unparsable values are skipped with a log record.
    #[must_use]
    pub fn parse(config: &str) -> Self {
        let mut parsed = Self::default();

        for pair in config.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                tracing::warn!(pair, "cache config entry is not k=v; skipping");
                continue;
            };

            match (key.trim(), value.trim()) {
                ("enabled", v) => parsed.enabled = v.parse().unwrap_or(parsed.enabled),
                ("putEnabled", v) => parsed.put_enabled = v.parse().unwrap_or(parsed.put_enabled),
                ("maxSize", v) => parsed.max_size = v.parse().ok(),
                ("ttlMs", v) => parsed.ttl = v.parse().map(Duration::from_millis).ok(),
                ("externalName", v) => parsed.external_name = Some(v.to_owned()),
                (other, _) => {
                    tracing::warn!(key = other, "unrecognized cache config key; skipping");
                }
            }
        }

        parsed
    }
}

/// Which built-in backend a config-driven cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// [`MemoryStore`]: unbounded hash map.
    Memory,

    /// [`BoundedStore`]: size bound with recency-based eviction.
    Bounded,
}

impl std::str::FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "hashmap" => Ok(Self::Memory),
            "bounded" | "ttl" => Ok(Self::Bounded),
            other => Err(StoreError::new(format!("unknown cache backend type: {other}"))),
        }
    }
}

/// Builds a cache from config-resolved settings.
///
/// Remote-backed caches are not built here; they need a client instance and go through
/// [`CommandCache::with_hooks`] or [`CommandCache::new`] with a
/// [`RemoteStore`][crate::RemoteStore] directly.
pub fn build<T>(name: impl Into<String>, kind: BackendKind, config: CacheConfig, clock: Clock) -> CommandCache<T, T>
where
    T: Clone + Send + Sync + 'static,
{
    let store: Arc<dyn CacheStore<T>> = match kind {
        BackendKind::Memory => Arc::new(MemoryStore::new()),
        BackendKind::Bounded => Arc::new(BoundedStore::new(
            config.max_size.unwrap_or(DEFAULT_BOUNDED_CAPACITY),
        )),
    };

    CommandCache::new(name, store, clock, config)
}

/// Transforms a stored value into the client-visible form, or vetoes the hit.
pub type GetHook<F, T> = Arc<dyn Fn(F) -> Lookup<T> + Send + Sync>;

/// Transforms a value into its storage form before the put, or skips the store.
pub type PutHook<T, F> = Arc<dyn Fn(&T) -> Option<F> + Send + Sync>;

/// A named read-through cache with translation hooks.
///
/// `F` is the storage form held by the backend; `T` is the client-visible form. When
/// the two coincide, [`CommandCache::new`] wires identity hooks; otherwise
/// [`CommandCache::with_hooks`] requires both directions.
///
/// The cache can never fail its caller: backend errors on get degrade to
/// [`Lookup::Miss`], backend errors on put report `false`, and hook panics degrade to
/// no-ops — all with log records.
pub struct CommandCache<F, T> {
    name: String,
    config: CacheConfig,
    store: Arc<dyn CacheStore<F>>,
    clock: Clock,
    get_hook: GetHook<F, T>,
    put_hook: PutHook<T, F>,
}

impl<F, T> fmt::Debug for CommandCache<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T> CommandCache<T, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cache whose storage form and client form coincide.
    pub fn new(name: impl Into<String>, store: Arc<dyn CacheStore<T>>, clock: Clock, config: CacheConfig) -> Self {
        Self::with_hooks(name, store, clock, config, |value| Lookup::Hit(value), |value: &T| {
            Some(value.clone())
        })
    }
}

impl<F, T> CommandCache<F, T>
where
    F: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Creates a cache translating between a storage form and a client form.
    ///
    /// `get_hook` runs after every backend hit and may veto it by returning
    /// [`Lookup::Miss`]. `put_hook` runs before every store and may skip it by
    /// returning `None`.
    pub fn with_hooks(
        name: impl Into<String>,
        store: Arc<dyn CacheStore<F>>,
        clock: Clock,
        config: CacheConfig,
        get_hook: impl Fn(F) -> Lookup<T> + Send + Sync + 'static,
        put_hook: impl Fn(&T) -> Option<F> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            clock,
            get_hook: Arc::new(get_hook),
            put_hook: Arc::new(put_hook),
        }
    }

    /// The unique name of this cache.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up a key.
    ///
    /// Misses on: disabled cache, absent key, expired entry, backend error (logged),
    /// hook veto, or hook panic (logged).
    pub async fn get(&self, key: &str) -> Lookup<T> {
        if !self.config.enabled {
            return Lookup::Miss;
        }

        let entry = match self.store.get(key).await {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(cache = %self.name, key, %error, "cache get failed; treating as miss");
                return Lookup::Miss;
            }
        };

        let Some(entry) = entry else {
            return Lookup::Miss;
        };

        if entry.is_expired(self.clock.instant(), self.config.ttl) {
            return Lookup::Miss;
        }

        match catch_unwind(AssertUnwindSafe(|| (self.get_hook)(entry.into_value()))) {
            Ok(lookup) => lookup,
            Err(_) => {
                tracing::error!(cache = %self.name, key, "cache get hook panicked; treating as miss");
                Lookup::Miss
            }
        }
    }

    /// Stores a value for a key.
    ///
    /// The put hook runs first, then the `put_enabled` gate — a vetoing hook therefore
    /// short-circuits identically whether or not puts are enabled. Returns `false`
    /// only on a backend error; skipped stores report `true`.
    pub async fn put(&self, key: &str, value: &T) -> bool {
        if !self.config.enabled {
            return true;
        }

        let stored = match catch_unwind(AssertUnwindSafe(|| (self.put_hook)(value))) {
            Ok(stored) => stored,
            Err(_) => {
                tracing::error!(cache = %self.name, key, "cache put hook panicked; skipping store");
                return true;
            }
        };

        let Some(stored) = stored else {
            return true;
        };

        if !self.config.put_enabled {
            return true;
        }

        let mut entry = CacheEntry::new(stored);
        entry.set_cached_at(self.clock.instant());

        match self.store.put(key, entry).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(cache = %self.name, key, %error, "cache put failed");
                false
            }
        }
    }

    /// Purges every entry. Backend errors are logged and swallowed.
    pub async fn empty(&self) {
        if let Err(error) = self.store.clear().await {
            tracing::warn!(cache = %self.name, %error, "cache purge failed");
        }
    }

    /// Renders the cache contents for diagnostics.
    ///
    /// Shows keys only; output past an implementation-defined length is truncated.
    pub async fn dump(&self) -> String {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(error) => return format!("{}: <dump failed: {error}>", self.name),
        };

        let mut out = format!("{} [entries={}]:", self.name, keys.len());
        for key in keys {
            out.push(' ');
            out.push_str(&key);

            if out.len() > DUMP_MAX_LEN {
                let mut cut = DUMP_MAX_LEN;
                while !out.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.truncate(cut);
                out.push_str("...<truncated>");
                break;
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_cache(config: CacheConfig) -> CommandCache<i32, i32> {
        CommandCache::new("test", Arc::new(MemoryStore::new()), Clock::new_frozen(), config)
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(CommandCache<i32, i32>: Send, Sync);
    }

    #[tokio::test]
    async fn identity_round_trip() {
        let cache = memory_cache(CacheConfig::default());

        assert!(cache.put("k", &7).await);
        assert_eq!(cache.get("k").await, Lookup::Hit(7));
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = memory_cache(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });

        assert!(cache.put("k", &7).await);
        assert_eq!(cache.get("k").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn put_disabled_skips_store_without_error() {
        let cache = memory_cache(CacheConfig {
            put_enabled: false,
            ..CacheConfig::default()
        });

        assert!(cache.put("k", &7).await);
        assert_eq!(cache.get("k").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn get_hook_vetoes_hit() {
        let cache = CommandCache::with_hooks(
            "veto",
            Arc::new(MemoryStore::new()),
            Clock::new_frozen(),
            CacheConfig::default(),
            |value: i32| if value > 0 { Lookup::Hit(value) } else { Lookup::Miss },
            |value: &i32| Some(*value),
        );

        assert!(cache.put("pos", &1).await);
        assert!(cache.put("neg", &-1).await);

        assert_eq!(cache.get("pos").await, Lookup::Hit(1));
        assert_eq!(cache.get("neg").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn put_hook_skips_store() {
        let cache = CommandCache::with_hooks(
            "skip",
            Arc::new(MemoryStore::new()),
            Clock::new_frozen(),
            CacheConfig::default(),
            |value: i32| Lookup::Hit(value),
            |value: &i32| (*value != 0).then_some(*value),
        );

        assert!(cache.put("zero", &0).await);
        assert_eq!(cache.get("zero").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn translation_hooks_convert_forms() {
        // Stored as strings, visible as lengths.
        let cache: CommandCache<String, usize> = CommandCache::with_hooks(
            "lens",
            Arc::new(MemoryStore::new()),
            Clock::new_frozen(),
            CacheConfig::default(),
            |stored: String| Lookup::Hit(stored.len()),
            |len: &usize| Some("x".repeat(*len)),
        );

        assert!(cache.put("k", &5).await);
        assert_eq!(cache.get("k").await, Lookup::Hit(5));
    }

    #[tokio::test]
    async fn hook_panic_degrades_to_miss() {
        let cache = CommandCache::with_hooks(
            "panicky",
            Arc::new(MemoryStore::new()),
            Clock::new_frozen(),
            CacheConfig::default(),
            |_: i32| -> Lookup<i32> { panic!("bad hook") },
            |value: &i32| Some(*value),
        );

        assert!(cache.put("k", &7).await);
        assert_eq!(cache.get("k").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let control = metronome::ClockControl::new();
        let cache = CommandCache::new(
            "ttl",
            Arc::new(MemoryStore::new()),
            control.to_clock(),
            CacheConfig {
                ttl: Some(Duration::from_secs(60)),
                ..CacheConfig::default()
            },
        );

        assert!(cache.put("k", &7).await);
        assert_eq!(cache.get("k").await, Lookup::Hit(7));

        control.advance(Duration::from_secs(61));
        assert_eq!(cache.get("k").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn dump_lists_keys_and_truncates() {
        let cache = memory_cache(CacheConfig::default());
        cache.put("alpha", &1).await;

        let dump = cache.dump().await;
        assert!(dump.starts_with("test [entries=1]:"));
        assert!(dump.contains("alpha"));

        for i in 0..200 {
            cache.put(&format!("key-{i:04}-{}", "x".repeat(24)), &i).await;
        }
        let dump = cache.dump().await;
        assert!(dump.len() <= DUMP_MAX_LEN + "...<truncated>".len());
        assert!(dump.ends_with("...<truncated>"));
    }

    #[test]
    fn config_parse_recognizes_keys() {
        let config = CacheConfig::parse("maxSize=100, ttlMs=60000,externalName=orders,putEnabled=false");

        assert_eq!(config.max_size, Some(100));
        assert_eq!(config.ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.external_name.as_deref(), Some("orders"));
        assert!(!config.put_enabled);
        assert!(config.enabled);
    }

    #[test]
    fn config_parse_skips_junk() {
        let config = CacheConfig::parse("nonsense,what=ever,maxSize=abc");

        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("Bounded".parse::<BackendKind>().unwrap(), BackendKind::Bounded);
        assert!("mystery".parse::<BackendKind>().is_err());
    }

    #[tokio::test]
    async fn build_selects_backend() {
        let cache = build::<i32>("built", BackendKind::Bounded, CacheConfig::default(), Clock::new_frozen());

        assert!(cache.put("k", &1).await);
        assert_eq!(cache.get("k").await, Lookup::Hit(1));
    }
}

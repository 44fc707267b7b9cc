// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end cache behavior across backends, hooks, and the registry.

use std::sync::Arc;
use std::time::Duration;

use metronome::{Clock, ClockControl};
use stash::{BackendKind, BoundedStore, CacheConfig, CacheRegistry, CommandCache, Lookup, MemoryStore};

#[derive(Debug, Clone, PartialEq)]
struct Account {
    id: u64,
    display_name: String,
}

#[tokio::test]
async fn round_trip_preserves_values() {
    let cache = CommandCache::new(
        "accounts",
        Arc::new(MemoryStore::new()),
        Clock::new_frozen(),
        CacheConfig::default(),
    );

    let account = Account {
        id: 7,
        display_name: "deckard".to_owned(),
    };

    assert!(cache.put("acct:7", &account).await);
    assert_eq!(cache.get("acct:7").await, Lookup::Hit(account));
    assert_eq!(cache.get("acct:8").await, Lookup::Miss);
}

#[tokio::test]
async fn ttl_expiry_follows_controlled_clock() {
    let control = ClockControl::new();
    let cache = CommandCache::new(
        "short-lived",
        Arc::new(BoundedStore::new(64)),
        control.to_clock(),
        CacheConfig {
            ttl: Some(Duration::from_millis(500)),
            ..CacheConfig::default()
        },
    );

    cache.put("k", &1).await;
    assert_eq!(cache.get("k").await, Lookup::Hit(1));

    control.advance(Duration::from_millis(499));
    assert_eq!(cache.get("k").await, Lookup::Hit(1));

    control.advance(Duration::from_millis(1));
    assert_eq!(cache.get("k").await, Lookup::Miss);
}

#[tokio::test]
async fn storage_form_translation() {
    // The backend holds compact ids; clients see full accounts.
    let cache: CommandCache<u64, Account> = CommandCache::with_hooks(
        "translated",
        Arc::new(MemoryStore::new()),
        Clock::new_frozen(),
        CacheConfig::default(),
        |id: u64| {
            Lookup::Hit(Account {
                id,
                display_name: format!("user-{id}"),
            })
        },
        |account: &Account| Some(account.id),
    );

    let account = Account {
        id: 42,
        display_name: "user-42".to_owned(),
    };

    assert!(cache.put("acct:42", &account).await);
    assert_eq!(cache.get("acct:42").await, Lookup::Hit(account));
}

#[tokio::test]
async fn registry_shares_caches_by_name() {
    let registry = CacheRegistry::new();
    let clock = Clock::new_frozen();

    let cache = Arc::new(stash::build::<String>(
        "shared",
        BackendKind::Memory,
        CacheConfig::default(),
        clock,
    ));
    registry.register(Arc::clone(&cache));

    // A second binding resolves the same cache instance.
    let other = registry.get::<String, String>("shared").unwrap();
    other.put("k", &"v".to_owned()).await;

    assert_eq!(cache.get("k").await, Lookup::Hit("v".to_owned()));

    registry.empty_all().await;
    assert_eq!(cache.get("k").await, Lookup::Miss);
}

#[tokio::test]
async fn cached_absent_payload_is_a_hit() {
    // A cached "nothing there" answer must short-circuit like any other hit.
    let cache: CommandCache<Option<Account>, Option<Account>> = CommandCache::new(
        "negatives",
        Arc::new(MemoryStore::new()),
        Clock::new_frozen(),
        CacheConfig::default(),
    );

    assert!(cache.put("acct:missing", &None).await);

    let lookup = cache.get("acct:missing").await;
    assert_eq!(lookup, Lookup::Hit(None));
    assert!(lookup.is_hit());
}

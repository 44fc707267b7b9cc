// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Read-through command caching with pluggable backends and value-translation hooks.
//!
//! # Why?
//!
//! Remote-call frameworks want to consult a cache before paying for a network round
//! trip, and to persist results afterwards, without the cache ever being able to fail
//! the call it serves. This crate provides that cache: lookups distinguish a genuine
//! miss from a present value, stores are best-effort, and hooks let callers translate
//! between the storage form and the client-visible form of a value.
//!
//! # Core Types
//!
//! - [`Lookup`] - The result of a cache lookup: [`Lookup::Miss`] or [`Lookup::Hit`].
//!   A hook that vetoes a hit produces `Miss`, which is distinct from a hit carrying
//!   an absent payload.
//! - [`CommandCache`] - The named cache façade owning the config, the hooks, and a
//!   backend.
//! - [`CacheStore`] - The backend trait. Built-ins: [`MemoryStore`] (hash map, no
//!   eviction), [`BoundedStore`] (size bound with recency-based eviction),
//!   [`RemoteStore`] (adapter over an external cache the server owns).
//! - [`CacheRegistry`] - Process-wide registry of named caches.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use metronome::Clock;
//! use stash::{CacheConfig, CommandCache, Lookup, MemoryStore};
//!
//! # futures::executor::block_on(async {
//! let cache = CommandCache::new(
//!     "accounts",
//!     Arc::new(MemoryStore::new()),
//!     Clock::new_frozen(),
//!     CacheConfig::default(),
//! );
//!
//! assert!(cache.put("k", &42).await);
//! assert_eq!(cache.get("k").await, Lookup::Hit(42));
//!
//! cache.empty().await;
//! assert_eq!(cache.get("k").await, Lookup::<i32>::Miss);
//! # });
//! ```

mod bounded;
mod cache;
mod entry;
mod error;
mod lookup;
mod memory;
mod registry;
mod remote;
mod store;

pub use bounded::BoundedStore;
pub use cache::{BackendKind, CacheConfig, CommandCache, GetHook, PutHook, build};
pub use entry::CacheEntry;
pub use error::StoreError;
pub use lookup::Lookup;
pub use memory::MemoryStore;
pub use registry::{CacheAdmin, CacheRegistry};
pub use remote::{RemoteCacheClient, RemoteStore};
pub use store::CacheStore;

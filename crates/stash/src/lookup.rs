// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The result of a cache lookup.
///
/// A lookup is either a [`Miss`][Lookup::Miss] (no entry, or a get hook vetoed the hit)
/// or a [`Hit`][Lookup::Hit] carrying the cached value. The two outcomes are distinct
/// variants rather than an `Option` so that a hit whose *payload* is absent (e.g. a
/// cached `None` recording that a resource does not exist) cannot be confused with a
/// miss.
///
/// # Examples
///
/// ```
/// use stash::Lookup;
///
/// // A cached "the resource does not exist" answer is still a hit.
/// let cached: Lookup<Option<String>> = Lookup::Hit(None);
/// assert!(cached.is_hit());
///
/// let miss: Lookup<Option<String>> = Lookup::Miss;
/// assert!(miss.is_miss());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Lookup<V> {
    /// No usable entry: the key was absent, the entry expired, or a hook vetoed it.
    Miss,

    /// The cache produced a value.
    Hit(V),
}

impl<V> Lookup<V> {
    /// Returns true for [`Lookup::Hit`].
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns true for [`Lookup::Miss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// Converts the hit value, preserving a miss.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Lookup<U> {
        match self {
            Self::Miss => Lookup::Miss,
            Self::Hit(v) => Lookup::Hit(f(v)),
        }
    }

    /// Extracts the hit value, discarding the hit/miss distinction.
    pub fn into_hit(self) -> Option<V> {
        match self {
            Self::Miss => None,
            Self::Hit(v) => Some(v),
        }
    }
}

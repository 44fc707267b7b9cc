// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::task::Waker;
use std::time::Instant;

/// Identifies a registered timer so it can be refreshed or unregistered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerKey(u64);

/// The set of timers registered against a controlled clock.
///
/// Timers are stored unsorted; registration and removal are O(1)/O(n) which is fine for
/// the small timer counts a controlled clock sees in tests.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    entries: Vec<Entry>,
    next_key: u64,
}

#[derive(Debug)]
struct Entry {
    key: TimerKey,
    when: Instant,
    waker: Waker,
}

impl Timers {
    pub fn register(&mut self, when: Instant, waker: Waker) -> TimerKey {
        let key = TimerKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);
        self.entries.push(Entry { key, when, waker });
        key
    }

    pub fn unregister(&mut self, key: TimerKey) {
        self.entries.retain(|e| e.key != key);
    }

    /// Replaces the waker of a registered timer; no-op if the timer already fired.
    pub fn refresh(&mut self, key: TimerKey, waker: &Waker) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.waker.clone_from(waker);
        }
    }

    /// Removes every timer that is due at `now` and returns the wakers to invoke.
    ///
    /// Wakers must be invoked by the caller *after* releasing the clock lock.
    pub fn take_due(&mut self, now: Instant) -> Vec<Waker> {
        let mut due = Vec::new();
        self.entries.retain(|e| {
            if e.when <= now {
                due.push(e.waker.clone());
                false
            } else {
                true
            }
        });
        due
    }

    /// The deadline of the timer that fires last, if any timers are registered.
    pub fn last_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.when).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

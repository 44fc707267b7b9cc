// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::{Duration, Instant, SystemTime};

use crate::{Clock, TimerKey, Timers};

/// Controls the flow of time in tests.
///
/// `ClockControl` is the test-side handle for a controlled [`Clock`]. Advancing the
/// control advances every clock created from it and fires any registered timers whose
/// deadline has been reached.
///
/// # Examples
///
/// ## Advancing time manually
///
/// ```
/// use std::time::Duration;
///
/// use metronome::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let start = clock.system_time();
/// control.advance(Duration::from_secs(1));
///
/// assert_eq!(clock.system_time(), start + Duration::from_secs(1));
/// ```
///
/// ## Advancing timers automatically
///
/// With [`ClockControl::auto_advance_timers`] enabled, registering a timer immediately
/// advances the clock far enough to fire every pending timer. This lets time-dependent
/// code run to completion without the test sprinkling explicit `advance` calls:
///
/// ```
/// use std::time::Duration;
///
/// use metronome::ClockControl;
///
/// # futures::executor::block_on(async {
/// let clock = ClockControl::new().auto_advance_timers(true).to_clock();
///
/// // Completes instantly; the clock jumps forward instead of sleeping.
/// clock.delay(Duration::from_secs(60)).await;
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClockControl {
    // Time control is shared across threads, so state consistency requires a mutex.
    state: Arc<Mutex<State>>,
}

impl ClockControl {
    /// Creates a new `ClockControl` with time frozen at the UNIX epoch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
        }
    }

    /// Creates a new `ClockControl` with time frozen at the given system time.
    #[must_use]
    pub fn new_at(time: SystemTime) -> Self {
        let control = Self::new();
        control.with_state(|s| s.system_time = time);
        control
    }

    /// Creates a new `ClockControl` starting at the current system time.
    #[must_use]
    pub fn now() -> Self {
        Self::new_at(SystemTime::now())
    }

    /// Converts the control into a [`Clock`] observing the controlled time.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock::with_control(self.clone())
    }

    /// Determines whether registering a timer automatically advances the clock far
    /// enough to fire every pending timer.
    #[must_use]
    pub fn auto_advance_timers(self, enabled: bool) -> Self {
        self.with_state(|s| s.auto_advance_timers = enabled);
        self
    }

    /// Manually advances the clock by the specified number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Manually advances the clock by the specified duration.
    ///
    /// In addition to advancing the current time, this fires every registered timer
    /// whose deadline is reached.
    pub fn advance(&self, duration: Duration) {
        let due = self.with_state(|s| s.advance(duration));
        wake_all(due);
    }

    pub(crate) fn system_time(&self) -> SystemTime {
        self.with_state(|s| s.system_time)
    }

    pub(crate) fn instant(&self) -> Instant {
        self.with_state(|s| s.instant)
    }

    pub(crate) fn register_timer(&self, when: Instant, waker: Waker) -> TimerKey {
        let (key, due) = self.with_state(|s| {
            let key = s.timers.register(when, waker);
            let due = if s.auto_advance_timers { s.drain_timers() } else { Vec::new() };
            (key, due)
        });
        wake_all(due);
        key
    }

    pub(crate) fn unregister_timer(&self, key: TimerKey) {
        self.with_state(|s| s.timers.unregister(key));
    }

    pub(crate) fn refresh_timer(&self, key: TimerKey, waker: &Waker) {
        self.with_state(|s| s.timers.refresh(key, waker));
    }

    #[cfg(test)]
    pub(crate) fn timers_len(&self) -> usize {
        self.with_state(|s| s.timers.len())
    }

    fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut State) -> R,
    {
        f(&mut self.state.lock().expect("acquiring the clock lock must always succeed"))
    }
}

impl From<&ClockControl> for Clock {
    fn from(control: &ClockControl) -> Self {
        control.to_clock()
    }
}

#[derive(Debug)]
struct State {
    instant: Instant,
    system_time: SystemTime,
    timers: Timers,
    auto_advance_timers: bool,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn new() -> Self {
        Self {
            instant: Instant::now(),
            system_time: SystemTime::UNIX_EPOCH,
            timers: Timers::default(),
            auto_advance_timers: false,
        }
    }

    /// Advances time and returns the wakers of timers that became due.
    ///
    /// The returned wakers must be invoked after the state lock is released.
    #[must_use]
    fn advance(&mut self, duration: Duration) -> Vec<Waker> {
        self.instant = self.instant.checked_add(duration).unwrap_or(self.instant);
        self.system_time = self.system_time.checked_add(duration).unwrap_or(self.system_time);
        self.timers.take_due(self.instant)
    }

    /// Jumps far enough ahead to fire every registered timer.
    #[must_use]
    fn drain_timers(&mut self) -> Vec<Waker> {
        match self.timers.last_deadline() {
            Some(deadline) if deadline > self.instant => {
                self.advance(deadline.duration_since(self.instant))
            }
            Some(_) => self.timers.take_due(self.instant),
            None => Vec::new(),
        }
    }
}

fn wake_all(wakers: Vec<Waker>) {
    for waker in wakers {
        waker.wake();
    }
}

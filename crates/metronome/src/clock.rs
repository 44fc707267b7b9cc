// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant, SystemTime};

use crate::{ClockControl, Delay, Stopwatch, Timeout};

/// Provides an abstraction for time-related operations.
///
/// The clock is used for:
///
/// - Retrieving the current absolute time ([`system_time`][Self::system_time]) and the
///   current monotonic time ([`instant`][Self::instant]).
/// - Creating [`Delay`] and [`Timeout`] futures and [`Stopwatch`] measurements.
///
/// # Clock construction
///
/// In production, create the clock with [`Clock::new_tokio`]; delays are driven by the
/// Tokio timer. In tests, create the clock from a [`ClockControl`] (or the
/// [`Clock::new_frozen`] shortcut) so the flow of time is fully controlled.
///
/// # State sharing between clocks
///
/// Cloning a clock is inexpensive and preserves shared state: clocks cloned from the
/// same controlled clock observe the same flow of time and share registered timers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::Clock;
///
/// # async fn delay_example(clock: &Clock) {
/// let stopwatch = clock.stopwatch();
///
/// clock.delay(Duration::from_millis(10)).await;
///
/// assert!(stopwatch.elapsed() >= Duration::from_millis(10));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Clock(ClockInner);

#[derive(Debug, Clone)]
enum ClockInner {
    System,
    Controlled(ClockControl),
}

impl Clock {
    /// Creates a new clock whose delays are driven by the Tokio runtime.
    ///
    /// Awaiting a [`Delay`] created from this clock outside of a Tokio runtime context
    /// panics, matching the behavior of the underlying timer.
    #[must_use]
    pub fn new_tokio() -> Self {
        Self(ClockInner::System)
    }

    /// Creates a new frozen clock.
    ///
    /// Shortcut for `ClockControl::new().to_clock()`. The returned clock does not
    /// advance; all time and timers are frozen until a control created alongside it
    /// advances them (which this constructor does not expose — use [`ClockControl`]
    /// directly when the test needs to advance time).
    ///
    /// # Example
    ///
    /// ```
    /// use metronome::Clock;
    ///
    /// let clock = Clock::new_frozen();
    ///
    /// let instant = clock.instant();
    /// assert_eq!(instant, clock.instant());
    /// ```
    #[must_use]
    pub fn new_frozen() -> Self {
        ClockControl::new().to_clock()
    }

    /// Creates a new frozen clock at the specified system time.
    #[must_use]
    pub fn new_frozen_at(time: SystemTime) -> Self {
        ClockControl::new_at(time).to_clock()
    }

    pub(crate) fn with_control(control: ClockControl) -> Self {
        Self(ClockInner::Controlled(control))
    }

    /// Retrieves the current absolute time as [`SystemTime`].
    ///
    /// The system time is not monotonic and can be affected by system clock changes.
    /// For relative time measurements, use [`stopwatch`][Self::stopwatch] or
    /// [`instant`][Self::instant].
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        match &self.0 {
            ClockInner::System => SystemTime::now(),
            ClockInner::Controlled(control) => control.system_time(),
        }
    }

    /// Retrieves the current monotonic [`Instant`].
    ///
    /// When measuring elapsed time against an instant retrieved from the clock, use
    /// [`Instant::duration_since`] rather than `Instant::elapsed`; `elapsed` bypasses
    /// the clock and will not respect controlled time in tests.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            ClockInner::System => Instant::now(),
            ClockInner::Controlled(control) => control.instant(),
        }
    }

    /// Creates a [`Delay`] that completes after the specified duration.
    ///
    /// A zero duration completes immediately; [`Duration::MAX`] never completes.
    #[must_use]
    pub fn delay(&self, duration: Duration) -> Delay {
        match &self.0 {
            ClockInner::System => Delay::system(duration),
            ClockInner::Controlled(control) => Delay::controlled(control.clone(), duration),
        }
    }

    /// Races `future` against a deadline `duration` from now.
    ///
    /// Resolves to `Ok(output)` if the future completes first, or `Err(`[`Elapsed`]`)`
    /// if the deadline is reached first.
    ///
    /// [`Elapsed`]: crate::Elapsed
    #[must_use]
    pub fn timeout<F: Future>(&self, duration: Duration, future: F) -> Timeout<F> {
        Timeout::new(future, self.delay(duration), duration)
    }

    /// Creates a [`Stopwatch`] started at the current instant.
    #[must_use]
    pub fn stopwatch(&self) -> Stopwatch {
        Stopwatch::new(self)
    }
}

impl AsRef<Self> for Clock {
    fn as_ref(&self) -> &Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Clock: Send, Sync, Clone, AsRef<Clock>);
    }

    #[test]
    fn frozen_clock_does_not_advance() {
        let clock = Clock::new_frozen();

        let instant = clock.instant();
        let system = clock.system_time();

        std::thread::sleep(Duration::from_micros(10));

        assert_eq!(instant, clock.instant());
        assert_eq!(system, clock.system_time());
    }

    #[test]
    fn frozen_at_starts_at_given_time() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        let clock = Clock::new_frozen_at(time);

        assert_eq!(clock.system_time(), time);
    }

    #[test]
    fn system_clock_tracks_wall_time() {
        let clock = Clock::new_tokio();

        let first = clock.instant();
        let second = clock.instant();

        assert!(second >= first);
        assert!(SystemTime::now() >= clock.system_time() - Duration::from_secs(10));
    }

    #[tokio::test]
    async fn tokio_delay_completes() {
        let clock = Clock::new_tokio();
        let start = Instant::now();

        clock.delay(Duration::from_millis(5)).await;

        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}

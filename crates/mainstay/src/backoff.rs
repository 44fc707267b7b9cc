// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

/// The factor used to determine the range of jitter applied to delays.
const JITTER_FACTOR: f64 = 0.5;

const EXPONENTIAL_FACTOR: f64 = 2.0;

/// Default initial interval for the exponential backoff a command gets when the
/// descriptor does not specify one.
pub(crate) const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Defines the backoff strategy used between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backoff {
    /// Constant delays between attempts.
    ///
    /// **Example with `2s` base delay:** `2s, 2s, 2s, ...`
    Constant,

    /// Delays that grow proportionally with the attempt count.
    ///
    /// **Example with `2s` base delay:** `2s, 4s, 6s, 8s, ...`
    Linear,

    /// Delays that double with each attempt.
    ///
    /// **Example with `2s` base delay:** `2s, 4s, 8s, 16s, ...`
    Exponential,
}

/// A backoff strategy plus its parameters: base delay, optional cap, and jitter.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mainstay::BackoffPolicy;
///
/// let policy = BackoffPolicy::exponential(Duration::from_millis(500))
///     .max_delay(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    backoff: Backoff,
    base_delay: Duration,
    max_delay: Option<Duration>,
    use_jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_BASE_DELAY)
    }
}

impl BackoffPolicy {
    fn new(backoff: Backoff, base_delay: Duration) -> Self {
        Self {
            backoff,
            base_delay,
            max_delay: None,
            use_jitter: false,
        }
    }

    /// A constant delay between attempts.
    #[must_use]
    pub fn constant(delay: Duration) -> Self {
        Self::new(Backoff::Constant, delay)
    }

    /// Delays growing linearly with the attempt count.
    #[must_use]
    pub fn linear(base_delay: Duration) -> Self {
        Self::new(Backoff::Linear, base_delay)
    }

    /// Delays doubling with each attempt.
    #[must_use]
    pub fn exponential(base_delay: Duration) -> Self {
        Self::new(Backoff::Exponential, base_delay)
    }

    /// Caps every generated delay.
    #[must_use]
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Adds symmetric jitter so synchronized callers spread out. With the built-in
    /// factor the result lies in `[0.75*delay, 1.25*delay]`.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.use_jitter = enabled;
        self
    }

    /// The backoff strategy.
    #[must_use]
    pub fn strategy(&self) -> Backoff {
        self.backoff
    }

    /// The base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// An infinite iterator of inter-attempt delays.
    ///
    /// Index `i` is the delay slept after attempt `i` fails (0-based).
    pub(crate) fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        DelaysIter {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

#[derive(Debug)]
struct DelaysIter {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Iterator for DelaysIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        // zero base delay => always zero
        if self.policy.base_delay.is_zero() {
            return Some(Duration::ZERO);
        }

        let next_attempt = self.attempt.saturating_add(1);
        let delay = match self.policy.backoff {
            Backoff::Constant => self.policy.base_delay,
            Backoff::Linear => self.policy.base_delay.saturating_mul(next_attempt),
            Backoff::Exponential => duration_mul_pow2(self.policy.base_delay, self.attempt),
        };

        let delay = if self.policy.use_jitter {
            apply_jitter(delay, fastrand::f64())
        } else {
            delay
        };

        self.attempt = next_attempt;
        Some(clamp_to_max(delay, self.policy.max_delay))
    }
}

fn clamp_to_max(d: Duration, max: Option<Duration>) -> Duration {
    max.map_or(d, |m| min(d, m))
}

fn duration_mul_pow2(base: Duration, attempt: u32) -> Duration {
    let factor = EXPONENTIAL_FACTOR.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    secs_to_duration_saturating(base.as_secs_f64() * factor)
}

/// Adds a symmetric, uniform jitter centered on the given delay.
///
/// `roll` is a uniform sample from `[0, 1)`; taking it as a parameter keeps the
/// jitter math deterministic under test while production draws from `fastrand`.
#[inline]
fn apply_jitter(delay: Duration, roll: f64) -> Duration {
    let ms = delay.as_secs_f64() * 1000.0;
    let offset = (ms * JITTER_FACTOR) / 2.0;
    let random_delay = (ms * JITTER_FACTOR).mul_add(roll, -offset);

    secs_to_duration_saturating((ms + random_delay) / 1000.0)
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_exponential_500ms() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.strategy(), Backoff::Exponential);
        assert_eq!(policy.base_delay(), Duration::from_millis(500));
    }

    #[test]
    fn constant_delays() {
        let delays: Vec<_> = BackoffPolicy::constant(Duration::from_secs(2)).delays().take(3).collect();

        assert_eq!(delays, vec![Duration::from_secs(2); 3]);
    }

    #[test]
    fn linear_delays() {
        let delays: Vec<_> = BackoffPolicy::linear(Duration::from_secs(2)).delays().take(3).collect();

        assert_eq!(
            delays,
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)]
        );
    }

    #[test]
    fn exponential_delays() {
        let delays: Vec<_> = BackoffPolicy::exponential(Duration::from_millis(500))
            .delays()
            .take(4)
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[test]
    fn max_delay_caps_growth() {
        let delays: Vec<_> = BackoffPolicy::exponential(Duration::from_secs(1))
            .max_delay(Duration::from_secs(3))
            .delays()
            .take(4)
            .collect();

        assert_eq!(delays[2], Duration::from_secs(3));
        assert_eq!(delays[3], Duration::from_secs(3));
    }

    #[test]
    fn zero_base_delay_is_always_zero() {
        let delays: Vec<_> = BackoffPolicy::exponential(Duration::ZERO).delays().take(3).collect();

        assert_eq!(delays, vec![Duration::ZERO; 3]);
    }

    #[test]
    fn jitter_midpoint_is_identity() {
        // roll = 0.5 lands exactly on the requested delay.
        assert_eq!(apply_jitter(Duration::from_secs(2), 0.5), Duration::from_secs(2));
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(apply_jitter(Duration::from_secs(2), 0.0), Duration::from_millis(1500));
        assert!(apply_jitter(Duration::from_secs(2), 1.0 - f64::EPSILON) >= Duration::from_millis(2499));
    }

    #[test]
    fn jittered_delays_stay_within_the_jitter_window() {
        let policy = BackoffPolicy::constant(Duration::from_secs(2)).jitter(true);

        for delay in policy.delays().take(50) {
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn huge_exponent_saturates() {
        let mut delays = BackoffPolicy::exponential(Duration::from_secs(1)).delays().skip(200);

        assert_eq!(delays.next().unwrap(), Duration::MAX);
    }
}

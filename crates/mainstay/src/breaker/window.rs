// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::BreakerEvent;

const MIN_SAMPLING_DURATION: Duration = Duration::from_secs(1);

/// Aggregated event counts over the rolling window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    /// Attempts that completed successfully.
    pub success: u32,
    /// Attempts that failed with a breaker-counted error.
    pub failure: u32,
    /// Attempts that exceeded the latency budget.
    pub timeout: u32,
    /// Submissions rejected because the circuit was open.
    pub short_circuit: u32,
    /// Submissions rejected by the bulkhead.
    pub rejected: u32,
}

impl Counts {
    /// Executed attempts: the error-rate denominator. Short-circuited and
    /// pool-rejected submissions never executed, so they are excluded.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.success.saturating_add(self.failure).saturating_add(self.timeout)
    }

    /// Failures plus timeouts over executed attempts, in `0.0..=1.0`.
    #[must_use]
    pub fn error_rate(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }

        let errors = self.failure.saturating_add(self.timeout);
        #[expect(clippy::cast_possible_truncation, reason = "rate fits f32 comfortably")]
        let rate = (f64::from(errors) / f64::from(total)) as f32;
        rate
    }

    fn record(&mut self, event: BreakerEvent) {
        let slot = match event {
            BreakerEvent::Success => &mut self.success,
            BreakerEvent::Failure => &mut self.failure,
            BreakerEvent::Timeout => &mut self.timeout,
            BreakerEvent::ShortCircuit => &mut self.short_circuit,
            BreakerEvent::Rejected => &mut self.rejected,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Tracks breaker events over a sliding window of fixed-duration buckets.
///
/// Bucket rotation is driven by the monotonic instants the caller passes in; a stale
/// bucket's counts are dropped once the window slides past it.
#[derive(Debug)]
pub(crate) struct CounterWindow {
    sampling_duration: Duration,
    bucket_duration: Duration,
    buckets: VecDeque<Bucket>,
}

impl CounterWindow {
    pub fn new(sampling_duration: Duration, bucket_count: u32) -> Self {
        let sampling_duration = sampling_duration.max(MIN_SAMPLING_DURATION);
        let bucket_count = bucket_count.max(1);

        Self {
            sampling_duration,
            bucket_duration: sampling_duration / bucket_count,
            buckets: VecDeque::with_capacity(bucket_count as usize),
        }
    }

    pub fn record(&mut self, event: BreakerEvent, now: Instant) {
        // Drop buckets the window has slid past.
        while let Some(front) = self.buckets.front()
            && now.duration_since(front.started_at) > self.sampling_duration
        {
            self.buckets.pop_front();
        }

        if let Some(back) = self.buckets.back_mut()
            && now.duration_since(back.started_at) < self.bucket_duration
        {
            back.counts.record(event);
        } else {
            let mut bucket = Bucket::new(now);
            bucket.counts.record(event);
            self.buckets.push_back(bucket);
        }
    }

    pub fn totals(&self) -> Counts {
        let mut totals = Counts::default();
        for bucket in &self.buckets {
            totals.success = totals.success.saturating_add(bucket.counts.success);
            totals.failure = totals.failure.saturating_add(bucket.counts.failure);
            totals.timeout = totals.timeout.saturating_add(bucket.counts.timeout);
            totals.short_circuit = totals.short_circuit.saturating_add(bucket.counts.short_circuit);
            totals.rejected = totals.rejected.saturating_add(bucket.counts.rejected);
        }
        totals
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct Bucket {
    started_at: Instant,
    counts: Counts,
}

impl Bucket {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            counts: Counts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_land_in_the_right_counters() {
        let mut window = CounterWindow::new(Duration::from_secs(10), 10);
        let now = Instant::now();

        window.record(BreakerEvent::Success, now);
        window.record(BreakerEvent::Failure, now);
        window.record(BreakerEvent::Timeout, now);
        window.record(BreakerEvent::ShortCircuit, now);
        window.record(BreakerEvent::Rejected, now);

        let counts = window.totals();
        assert_eq!(counts.success, 1);
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.timeout, 1);
        assert_eq!(counts.short_circuit, 1);
        assert_eq!(counts.rejected, 1);
    }

    #[test]
    fn error_rate_counts_failures_and_timeouts() {
        let counts = Counts {
            success: 2,
            failure: 1,
            timeout: 1,
            short_circuit: 10,
            rejected: 10,
        };

        assert_eq!(counts.total(), 4);
        assert!((counts.error_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn error_rate_of_empty_window_is_zero() {
        assert_eq!(Counts::default().error_rate(), 0.0);
    }

    #[test]
    fn stale_buckets_are_dropped() {
        let mut window = CounterWindow::new(Duration::from_secs(10), 10);
        let start = Instant::now();

        window.record(BreakerEvent::Failure, start);
        assert_eq!(window.totals().failure, 1);

        // Recording past the sampling window slides the old bucket out.
        window.record(BreakerEvent::Success, start + Duration::from_secs(11));
        let counts = window.totals();
        assert_eq!(counts.failure, 0);
        assert_eq!(counts.success, 1);
    }

    #[test]
    fn buckets_rotate_at_bucket_duration() {
        let mut window = CounterWindow::new(Duration::from_secs(10), 10);
        let start = Instant::now();

        for i in 0..30 {
            window.record(BreakerEvent::Success, start + Duration::from_millis(i * 100));
        }

        assert_eq!(window.buckets.len(), 3);
        assert_eq!(window.buckets[0].counts.success, 10);
    }

    #[test]
    fn tiny_sampling_duration_is_clamped() {
        let window = CounterWindow::new(Duration::from_millis(1), 10);
        assert_eq!(window.sampling_duration, MIN_SAMPLING_DURATION);
    }

    #[test]
    fn reset_clears_counts() {
        let mut window = CounterWindow::new(Duration::from_secs(10), 10);
        window.record(BreakerEvent::Failure, Instant::now());

        window.reset();

        assert_eq!(window.totals(), Counts::default());
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-command circuit breaking.
//!
//! Each command name owns one [`CircuitBreaker`]. The breaker runs the classic
//! three-state machine: CLOSED while the rolling error rate stays under the
//! threshold, OPEN (rejecting fast) once it trips, and HALF_OPEN after the sleep
//! window, admitting a single probe whose outcome decides between closing and
//! re-opening.

mod window;

use std::time::{Duration, Instant};

use metronome::Clock;
use parking_lot::Mutex;

pub use window::Counts;
pub(crate) use window::CounterWindow;

const DEFAULT_ERROR_THRESHOLD: f32 = 0.5;
const DEFAULT_SAMPLING_WINDOW: Duration = Duration::from_secs(10);
const DEFAULT_BUCKETS: u32 = 10;
const DEFAULT_MIN_VOLUME: u32 = 20;
const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_secs(5);

/// An event the breaker accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    /// An attempt completed successfully.
    Success,
    /// An attempt failed with an error that counts against the breaker.
    Failure,
    /// An attempt exceeded the latency budget.
    Timeout,
    /// A submission was rejected because the circuit was open.
    ShortCircuit,
    /// A submission was rejected by the bulkhead.
    Rejected,
}

/// A forced override pinning the breaker's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedState {
    /// Reject every submission regardless of health.
    Open,
    /// Admit every submission regardless of health.
    Closed,
}

/// Whether an admitted submission runs normally or as a half-open probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Regular execution with the circuit closed.
    Normal,
    /// The single probe admitted while half-open.
    Probe,
}

/// The outcome of asking the breaker to admit a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed, in the given mode.
    Allowed(ExecutionMode),
    /// The circuit is open; fail fast.
    Rejected,
}

/// The externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Admitting submissions; health is evaluated per recorded outcome.
    Closed,
    /// Rejecting submissions until the sleep window elapses.
    Open,
    /// Sleep window elapsed; a single probe decides what happens next.
    HalfOpen,
}

/// Configuration for one command's circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerPolicy {
    /// Whether the breaker trips at all. Disabled breakers admit everything but keep
    /// counting events.
    pub enabled: bool,

    /// Error rate (failures + timeouts over executed attempts) at or above which the
    /// circuit trips, in `0.0..=1.0`.
    pub error_threshold: f32,

    /// Length of the rolling statistics window.
    pub sampling_window: Duration,

    /// Number of buckets the rolling window is divided into.
    pub buckets: u32,

    /// Minimum executed attempts in the window before the circuit may trip.
    pub min_volume: u32,

    /// How long the circuit stays open before admitting a probe.
    pub sleep_window: Duration,

    /// Forced override; wins over everything else.
    pub forced: Option<ForcedState>,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            sampling_window: DEFAULT_SAMPLING_WINDOW,
            buckets: DEFAULT_BUCKETS,
            min_volume: DEFAULT_MIN_VOLUME,
            sleep_window: DEFAULT_SLEEP_WINDOW,
            forced: None,
        }
    }
}

/// A snapshot of breaker state and rolling counts, for health checks and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSnapshot {
    /// The current state.
    pub state: BreakerState,
    /// Rolling event counts.
    pub counts: Counts,
}

/// The per-command circuit breaker.
///
/// State transitions are serialized under one mutex, which also gives the ordering
/// guarantee that an event recorded for an attempt is visible to any subsequent
/// [`allow`][Self::allow] on the same breaker. Expensive work (clock reads) happens
/// outside the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    clock: Clock,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: State,
    window: CounterWindow,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_started: Option<Instant> },
}

impl CircuitBreaker {
    /// Creates a breaker with the given policy, observing the given clock.
    #[must_use]
    pub fn new(policy: BreakerPolicy, clock: Clock) -> Self {
        let window = CounterWindow::new(policy.sampling_window, policy.buckets);
        Self {
            policy,
            clock,
            inner: Mutex::new(Inner {
                state: State::Closed,
                window,
            }),
        }
    }

    /// Asks the breaker to admit a submission.
    ///
    /// A rejection is tallied in the short-circuit counter. While half-open, exactly
    /// one probe is admitted; a probe that never reports back frees the slot after
    /// another sleep window.
    pub fn allow(&self) -> Admission {
        let now = self.clock.instant();
        let mut guard = self.inner.lock();
        let Inner { state, window } = &mut *guard;

        match self.policy.forced {
            Some(ForcedState::Open) => {
                window.record(BreakerEvent::ShortCircuit, now);
                return Admission::Rejected;
            }
            Some(ForcedState::Closed) => return Admission::Allowed(ExecutionMode::Normal),
            None => {}
        }

        if !self.policy.enabled {
            return Admission::Allowed(ExecutionMode::Normal);
        }

        match state {
            State::Closed => Admission::Allowed(ExecutionMode::Normal),
            State::Open { until } => {
                if now >= *until {
                    *state = State::HalfOpen {
                        probe_started: Some(now),
                    };
                    Admission::Allowed(ExecutionMode::Probe)
                } else {
                    window.record(BreakerEvent::ShortCircuit, now);
                    Admission::Rejected
                }
            }
            State::HalfOpen { probe_started } => match probe_started {
                // A probe that never reported back does not hold the slot forever.
                Some(started) if now.duration_since(*started) < self.policy.sleep_window => {
                    window.record(BreakerEvent::ShortCircuit, now);
                    Admission::Rejected
                }
                _ => {
                    *probe_started = Some(now);
                    Admission::Allowed(ExecutionMode::Probe)
                }
            },
        }
    }

    /// Records an attempt outcome and applies any state transition it causes.
    pub fn record(&self, event: BreakerEvent) {
        let now = self.clock.instant();
        let mut guard = self.inner.lock();
        let Inner { state, window } = &mut *guard;

        window.record(event, now);

        if !self.policy.enabled || self.policy.forced.is_some() {
            return;
        }

        let counted_error = matches!(event, BreakerEvent::Failure | BreakerEvent::Timeout);

        match state {
            State::Closed => {
                if !counted_error {
                    return;
                }

                let counts = window.totals();
                if counts.total() >= self.policy.min_volume && counts.error_rate() >= self.policy.error_threshold {
                    tracing::warn!(
                        error_rate = counts.error_rate(),
                        volume = counts.total(),
                        "circuit opened",
                    );
                    *state = State::Open {
                        until: now + self.policy.sleep_window,
                    };
                }
            }
            State::Open { .. } => {
                // The state moved under an in-flight attempt; its result is lost.
            }
            State::HalfOpen { .. } => match event {
                BreakerEvent::Success => {
                    tracing::info!("circuit closed after successful probe");
                    *state = State::Closed;
                    window.reset();
                }
                BreakerEvent::Failure | BreakerEvent::Timeout => {
                    tracing::warn!("probe failed; circuit re-opened");
                    *state = State::Open {
                        until: now + self.policy.sleep_window,
                    };
                }
                BreakerEvent::ShortCircuit | BreakerEvent::Rejected => {}
            },
        }
    }

    /// The current state and rolling counts.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: match inner.state {
                State::Closed => BreakerState::Closed,
                State::Open { .. } => BreakerState::Open,
                State::HalfOpen { .. } => BreakerState::HalfOpen,
            },
            counts: inner.window.totals(),
        }
    }

    /// The policy this breaker runs under.
    #[must_use]
    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }
}

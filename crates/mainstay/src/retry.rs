// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Display};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use metronome::Clock;

use crate::{ApiError, BackoffPolicy, Classifier, ErrorKind};

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Represents a single attempt in a retry operation.
///
/// Tracks the 0-based attempt index and whether this is the final allowed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    index: u32,
    is_last: bool,
}

impl Attempt {
    /// Creates an attempt with the given index and last-attempt flag.
    #[must_use]
    pub fn new(index: u32, is_last: bool) -> Self {
        Self { index, is_last }
    }

    pub(crate) fn first(max_attempts: u32) -> Self {
        Self::new(0, max_attempts <= 1)
    }

    /// True for attempt 0.
    #[must_use]
    pub fn is_first(self) -> bool {
        self.index == 0
    }

    /// True when no further attempts are allowed after this one.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.is_last
    }

    /// The 0-based attempt index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    pub(crate) fn increment(self, max_attempts: u32) -> Option<Self> {
        let next = self.index.saturating_add(1);

        if next >= max_attempts {
            return None;
        }

        Some(Self::new(next, next == max_attempts.saturating_sub(1)))
    }
}

impl Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.index.fmt(f)
    }
}

/// How many attempts a command gets and how failures are spaced and classified.
///
/// `max_attempts` counts the first try: a value of 3 means the initial attempt plus
/// two retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffPolicy,
    classifier: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            classifier: Classifier::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and defaults elsewhere.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Replaces the backoff policy.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replaces the failure classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The attempt budget, counting the first try.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drives `op` up to `max_attempts` times, sleeping per backoff between attempts.
    ///
    /// A failure classified non-retryable aborts immediately regardless of attempts
    /// remaining; [`ErrorKind::Cancelled`] always aborts. A failure carrying a
    /// retry-after hint overrides the backoff delay for the following attempt.
    pub(crate) async fn drive<T, Op, Fut>(
        &self,
        clock: &Clock,
        listeners: &RetryListeners,
        mut op: Op,
    ) -> Result<T, ApiError>
    where
        Op: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = Attempt::first(self.max_attempts);
        let mut delays = self.backoff.delays();

        loop {
            listeners.open(attempt);

            match op(attempt).await {
                Ok(value) => {
                    listeners.close(None);
                    return Ok(value);
                }
                Err(error) => {
                    listeners.error(attempt, &error);

                    if error.kind() == ErrorKind::Cancelled || !self.classifier.classify(&error) {
                        listeners.close(Some(&error));
                        return Err(error);
                    }

                    let Some(next) = attempt.increment(self.max_attempts) else {
                        listeners.close(Some(&error));
                        return Err(error);
                    };

                    let delay = error
                        .retry_after()
                        .unwrap_or_else(|| delays.next().unwrap_or(Duration::ZERO));

                    tracing::warn!(
                        attempt = attempt.index(),
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "attempt failed; retrying after backoff",
                    );

                    clock.delay(delay).await;
                    attempt = next;
                }
            }
        }
    }
}

type OnOpen = Arc<dyn Fn(Attempt) + Send + Sync>;
type OnError = Arc<dyn Fn(Attempt, &ApiError) + Send + Sync>;
type OnClose = Arc<dyn Fn(Option<&ApiError>) + Send + Sync>;

/// Side-effect-only callbacks around the retry loop.
///
/// `on_open` fires before each attempt, `on_error` after each failed attempt, and
/// `on_close` once with the terminal cause (or `None` on success). Listeners cannot
/// alter the outcome; a panicking listener is swallowed with a log record.
#[derive(Clone, Default)]
pub struct RetryListeners {
    on_open: Option<OnOpen>,
    on_error: Option<OnError>,
    on_close: Option<OnClose>,
}

impl RetryListeners {
    /// Listeners with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the before-attempt callback.
    #[must_use]
    pub fn on_open(mut self, f: impl Fn(Attempt) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Registers the failed-attempt callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(Attempt, &ApiError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Registers the terminal-outcome callback.
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(Option<&ApiError>) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    fn open(&self, attempt: Attempt) {
        if let Some(f) = &self.on_open {
            swallow(|| f(attempt), "on_open");
        }
    }

    fn error(&self, attempt: Attempt, error: &ApiError) {
        if let Some(f) = &self.on_error {
            swallow(|| f(attempt, error), "on_error");
        }
    }

    fn close(&self, last_error: Option<&ApiError>) {
        if let Some(f) = &self.on_close {
            swallow(|| f(last_error), "on_close");
        }
    }
}

impl fmt::Debug for RetryListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryListeners")
            .field("on_open", &self.on_open.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

fn swallow(f: impl FnOnce(), which: &str) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(listener = which, "retry listener panicked; ignoring");
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// The kind of failure a command produced.
///
/// Every failed outcome carries exactly one kind; the kind drives both retry
/// eligibility and circuit-breaker accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A transient failure: transport errors, 5xx responses, missing instances.
    /// Eligible for retry; counts against the breaker.
    Retryable,

    /// A permanent failure: invalid arguments, authentication, 4xx responses
    /// (excluding 408). Never retried; does not count against the breaker.
    NonRetryable,

    /// The per-attempt latency budget was exceeded. Eligible for retry; counts as a
    /// timeout event in the breaker.
    Timeout,

    /// The circuit was open at submission time; the callback was never invoked.
    ShortCircuited,

    /// The bulkhead was at capacity and its queue full; the callback was never invoked.
    PoolRejected,

    /// The submission was cancelled from outside before completing.
    Cancelled,

    /// The command descriptor failed validation at build time.
    InvalidDescriptor,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non-retryable",
            Self::Timeout => "timeout",
            Self::ShortCircuited => "short-circuited",
            Self::PoolRejected => "pool-rejected",
            Self::Cancelled => "cancelled",
            Self::InvalidDescriptor => "invalid-descriptor",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error surfaced by command execution.
///
/// Wraps the last failure cause with its [`ErrorKind`] classification. An optional
/// retry-after hint (e.g. from a `Retry-After` header) overrides the backoff delay for
/// the next attempt.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    retry_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    /// A transient failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    /// A permanent failure that must not be retried.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonRetryable, message)
    }

    /// The per-attempt latency budget was exceeded.
    pub fn timeout(budget: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("attempt exceeded the {budget:?} latency budget"),
        )
    }

    /// The circuit for `command` was open at submission time.
    pub fn short_circuited(command: &str) -> Self {
        Self::new(
            ErrorKind::ShortCircuited,
            format!("circuit for command {command} is open"),
        )
    }

    /// The bulkhead for `command` rejected the submission.
    pub fn pool_rejected(command: &str) -> Self {
        Self::new(
            ErrorKind::PoolRejected,
            format!("bulkhead for command {command} is at capacity"),
        )
    }

    /// The submission was cancelled from outside.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "command was cancelled")
    }

    /// The command descriptor failed validation.
    pub fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidDescriptor, message)
    }

    /// Discovery produced no available instance. Retryable: the next attempt may see
    /// a healthier pool.
    pub fn no_instance(service: &str) -> Self {
        Self::new(
            ErrorKind::Retryable,
            format!("no available instances were found for service {service}"),
        )
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a hint for when the next attempt should run, overriding backoff.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// The failure kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The retry-after hint, if the failure carried one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

type Predicate = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

#[derive(Clone)]
struct Rule {
    applies: Predicate,
    retryable: bool,
}

/// Decides whether a failure is worth another attempt.
///
/// Rules are consulted in registration order and the first match wins, so callers
/// register the most specific rule first. When no rule matches, the default
/// classification applies: [`ErrorKind::NonRetryable`] is final, everything else is
/// retried.
///
/// # Examples
///
/// ```
/// use mainstay::{ApiError, Classifier};
///
/// // HTTP 429 is retryable even though the service reports it as a client error.
/// let classifier = Classifier::new()
///     .rule(|e| e.to_string().contains("429"), true)
///     .rule(|e| e.to_string().contains("4"), false);
///
/// assert!(classifier.classify(&ApiError::non_retryable("status 429")));
/// assert!(!classifier.classify(&ApiError::retryable("status 400")));
/// ```
#[derive(Clone, Default)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// A classifier holding only the default rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule. Rules match first-wins, so add the most specific rule first.
    #[must_use]
    pub fn rule(mut self, applies: impl Fn(&ApiError) -> bool + Send + Sync + 'static, retryable: bool) -> Self {
        self.rules.push(Rule {
            applies: Arc::new(applies),
            retryable,
        });
        self
    }

    /// Whether the error should be retried.
    #[must_use]
    pub fn classify(&self, error: &ApiError) -> bool {
        for rule in &self.rules {
            if (rule.applies)(error) {
                return rule.retryable;
            }
        }

        error.kind() != ErrorKind::NonRetryable
    }
}

impl Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").field("rules", &self.rules.len()).finish()
    }
}

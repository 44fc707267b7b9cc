// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use stash::CommandCache;
use url::Url;

use crate::context::AttributeValue;
use crate::{
    ApiError, Attempt, BackoffPolicy, BreakerPolicy, Classifier, CommandContext, IsolationMode, PoolPolicy,
    RemoteCall, RetryListeners, RetryPolicy, UriProvider,
};

pub(crate) const DEFAULT_COMMAND_NAME: &str = "ApiCommand";
pub(crate) const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Execution-shape options for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Per-attempt latency budget. Mandatory; an attempt exceeding it is abandoned
    /// and classified as a timeout.
    pub attempt_timeout: Duration,

    /// How attempts are isolated from the submitting task.
    pub isolation: IsolationMode,

    /// Whether a registered fallback is consulted on terminal failure.
    pub fallback_enabled: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            isolation: IsolationMode::default(),
            fallback_enabled: false,
        }
    }
}

/// Binds a command to a cache and the key used for both lookup and store.
pub struct CacheBinding<T> {
    /// The cache consulted before attempts and written after success.
    pub cache: Arc<CommandCache<T, T>>,
    /// The key for this invocation. An empty key disables the binding.
    pub key: String,
}

impl<T> Clone for CacheBinding<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            key: self.key.clone(),
        }
    }
}

impl<T> fmt::Debug for CacheBinding<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("cache", &self.cache.name())
            .field("key", &self.key)
            .finish()
    }
}

type CacheGetHook = Arc<dyn Fn(&str, Duration, bool) + Send + Sync>;
type AttemptHook = Arc<dyn Fn(Attempt, Duration, Option<&ApiError>) + Send + Sync>;

/// Instrumentation wrappers around the cache-get step and the attempt invocation.
///
/// Each hook observes the elapsed time of its step; hooks cannot alter outcomes and
/// panics in them are swallowed with a log record. Keep hooks quick — their time
/// counts against the attempt budget.
#[derive(Clone, Default)]
pub struct CommandHooks {
    on_cache_get: Option<CacheGetHook>,
    on_attempt: Option<AttemptHook>,
}

impl CommandHooks {
    /// Hooks with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes each cache lookup: key, elapsed time, and whether it hit.
    #[must_use]
    pub fn on_cache_get(mut self, f: impl Fn(&str, Duration, bool) + Send + Sync + 'static) -> Self {
        self.on_cache_get = Some(Arc::new(f));
        self
    }

    /// Observes each attempt: attempt, elapsed time, and the failure if it failed.
    #[must_use]
    pub fn on_attempt(mut self, f: impl Fn(Attempt, Duration, Option<&ApiError>) + Send + Sync + 'static) -> Self {
        self.on_attempt = Some(Arc::new(f));
        self
    }

    pub(crate) fn cache_get(&self, key: &str, elapsed: Duration, hit: bool) {
        if let Some(f) = &self.on_cache_get
            && catch_unwind(AssertUnwindSafe(|| f(key, elapsed, hit))).is_err()
        {
            tracing::error!("cache-get hook panicked; ignoring");
        }
    }

    pub(crate) fn attempt(&self, attempt: Attempt, elapsed: Duration, error: Option<&ApiError>) {
        if let Some(f) = &self.on_attempt
            && catch_unwind(AssertUnwindSafe(|| f(attempt, elapsed, error))).is_err()
        {
            tracing::error!("attempt hook panicked; ignoring");
        }
    }
}

impl fmt::Debug for CommandHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHooks")
            .field("on_cache_get", &self.on_cache_get.is_some())
            .field("on_attempt", &self.on_attempt.is_some())
            .finish()
    }
}

type Fallback<T> = Arc<dyn Fn(&ApiError) -> T + Send + Sync>;

/// An immutable descriptor of one logical remote operation.
///
/// Built with [`Command::builder`]; submitted through
/// [`CommandEngine`][crate::CommandEngine]. The descriptor is shared read-only with
/// the engine, so one descriptor can be submitted any number of times.
pub struct Command<T> {
    pub(crate) name: String,
    pub(crate) provider: Arc<dyn UriProvider<T>>,
    pub(crate) callback: RemoteCall<T>,
    pub(crate) execution: ExecutionPolicy,
    pub(crate) breaker: BreakerPolicy,
    pub(crate) pool: PoolPolicy,
    pub(crate) retry: RetryPolicy,
    pub(crate) cache: Option<CacheBinding<T>>,
    pub(crate) hooks: CommandHooks,
    pub(crate) listeners: RetryListeners,
    pub(crate) fallback: Option<Fallback<T>>,
    pub(crate) attributes: HashMap<String, AttributeValue>,
}

impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            provider: Arc::clone(&self.provider),
            callback: Arc::clone(&self.callback),
            execution: self.execution.clone(),
            breaker: self.breaker.clone(),
            pool: self.pool.clone(),
            retry: self.retry.clone(),
            cache: self.cache.clone(),
            hooks: self.hooks.clone(),
            listeners: self.listeners.clone(),
            fallback: self.fallback.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

impl<T> fmt::Debug for Command<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("execution", &self.execution)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<T> Command<T> {
    /// Starts building a command descriptor.
    #[must_use]
    pub fn builder() -> CommandBuilder<T> {
        CommandBuilder::new()
    }

    /// The logical command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The retry policy this command runs under.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The execution policy this command runs under.
    #[must_use]
    pub fn execution_policy(&self) -> &ExecutionPolicy {
        &self.execution
    }
}

/// Fluent builder for [`Command`] descriptors.
///
/// Two fields are required: the URI provider and the remote callback. Everything else
/// defaults sensibly; see [`build`][Self::build] for the repairs applied.
pub struct CommandBuilder<T> {
    name: Option<String>,
    provider: Option<Arc<dyn UriProvider<T>>>,
    callback: Option<RemoteCall<T>>,
    execution: ExecutionPolicy,
    breaker: BreakerPolicy,
    pool: PoolPolicy,
    max_attempts: u32,
    backoff: Option<BackoffPolicy>,
    classifier: Option<Classifier>,
    cache: Option<CacheBinding<T>>,
    hooks: CommandHooks,
    listeners: RetryListeners,
    fallback: Option<Fallback<T>>,
    attributes: HashMap<String, AttributeValue>,
}

impl<T> Default for CommandBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandBuilder<T> {
    /// A builder with nothing set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            provider: None,
            callback: None,
            execution: ExecutionPolicy::default(),
            breaker: BreakerPolicy::default(),
            pool: PoolPolicy::default(),
            max_attempts: crate::retry::DEFAULT_MAX_ATTEMPTS,
            backoff: None,
            classifier: None,
            cache: None,
            hooks: CommandHooks::default(),
            listeners: RetryListeners::default(),
            fallback: None,
            attributes: HashMap::new(),
        }
    }

    /// Logical command name, used for breaker/pool identity and config lookups.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// **Required.** The strategy resolving a base endpoint for each attempt.
    #[must_use]
    pub fn uri_provider(mut self, provider: Arc<dyn UriProvider<T>>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// **Required.** The remote invocation to execute per attempt.
    #[must_use]
    pub fn callback<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Arc<CommandContext>, Url) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.callback = Some(Arc::new(move |ctx, url| Box::pin(callback(ctx, url))));
        self
    }

    /// Attempt budget; counts the first try, so 3 means one try plus two retries.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff between attempts. Default: exponential with a 500 ms initial interval.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Failure classification. Default: non-retryable failures are final, everything
    /// else is retried.
    #[must_use]
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Per-attempt latency budget.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.execution.attempt_timeout = timeout;
        self
    }

    /// Attempt isolation mode.
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationMode) -> Self {
        self.execution.isolation = isolation;
        self
    }

    /// Replaces the whole execution policy.
    #[must_use]
    pub fn execution_policy(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    /// Circuit-breaker policy for this command name.
    #[must_use]
    pub fn breaker_policy(mut self, breaker: BreakerPolicy) -> Self {
        self.breaker = breaker;
        self
    }

    /// Bulkhead policy for this command name.
    #[must_use]
    pub fn pool_policy(mut self, pool: PoolPolicy) -> Self {
        self.pool = pool;
        self
    }

    /// Binds a cache and key consulted before attempts and written after success.
    #[must_use]
    pub fn cache(mut self, cache: Arc<CommandCache<T, T>>, key: impl Into<String>) -> Self {
        self.cache = Some(CacheBinding {
            cache,
            key: key.into(),
        });
        self
    }

    /// Instrumentation hooks around the cache-get step and attempt invocation.
    #[must_use]
    pub fn hooks(mut self, hooks: CommandHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Retry-loop listeners.
    #[must_use]
    pub fn listeners(mut self, listeners: RetryListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Fallback value producer, consulted on terminal failure when
    /// [`ExecutionPolicy::fallback_enabled`] is set.
    #[must_use]
    pub fn fallback(mut self, fallback: impl Fn(&ApiError) -> T + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self.execution.fallback_enabled = true;
        self
    }

    /// Adds an attribute visible to the callback via the command context.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl std::any::Any + Send + Sync) -> Self {
        self.attributes.insert(key.into(), Arc::new(value));
        self
    }

    /// Builds the descriptor.
    ///
    /// Fails with an invalid-descriptor error when the URI provider or callback is
    /// missing. Repairs applied: an attempt budget of 0 becomes 1 (with a warning),
    /// an unset name becomes `"ApiCommand"`, an unset backoff becomes exponential
    /// with a 500 ms initial interval.
    pub fn build(self) -> Result<Command<T>, ApiError> {
        let Some(provider) = self.provider else {
            return Err(ApiError::invalid_descriptor("uri provider is required"));
        };

        let Some(callback) = self.callback else {
            return Err(ApiError::invalid_descriptor("remote callback is required"));
        };

        let max_attempts = if self.max_attempts == 0 {
            tracing::warn!("max attempts cannot be zero; using 1");
            1
        } else {
            self.max_attempts
        };

        let retry = RetryPolicy::new(max_attempts)
            .backoff(self.backoff.unwrap_or_default())
            .classifier(self.classifier.unwrap_or_default());

        Ok(Command {
            name: self.name.unwrap_or_else(|| DEFAULT_COMMAND_NAME.to_owned()),
            provider,
            callback,
            execution: self.execution,
            breaker: self.breaker,
            pool: self.pool,
            retry,
            cache: self.cache,
            hooks: self.hooks,
            listeners: self.listeners,
            fallback: self.fallback,
            attributes: self.attributes,
        })
    }
}

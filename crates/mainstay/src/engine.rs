// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use metronome::Clock;
use parking_lot::RwLock;
use stash::{CacheRegistry, Lookup};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::breaker::{Admission, BreakerEvent, CircuitBreaker};
use crate::pool::{Bulkhead, PoolFull};
use crate::{ApiError, Command, CommandContext, ErrorKind, IsolationMode};

/// The command execution engine.
///
/// Owns the name-indexed registries of circuit breakers, bulkheads, and caches —
/// created on first use from each command's policies, shared by every later
/// submission under the same name, and living until the engine is dropped. The
/// engine is the only holder of this state; there are no hidden globals.
///
/// Three entrypoints share identical execution semantics and differ only in
/// delivery: [`execute`][Self::execute] blocks the caller, [`enqueue`][Self::enqueue]
/// returns a cancellable future, and [`observe`][Self::observe] returns a one-shot
/// stream.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use mainstay::{Command, CommandEngine, ConstantUriProvider, UriProvider};
/// use metronome::Clock;
/// use url::Url;
///
/// # async fn example() -> Result<(), mainstay::ApiError> {
/// let engine = CommandEngine::new(Clock::new_tokio());
///
/// let provider: Arc<dyn UriProvider<String>> =
///     Arc::new(ConstantUriProvider::new(Url::parse("http://somehost.com/").unwrap()));
/// let command = Command::builder()
///     .name("GetGreeting")
///     .uri_provider(provider)
///     .callback(|_ctx, url| async move {
///         // Real callers perform the remote call here.
///         Ok(format!("called {url}"))
///     })
///     .build()?;
///
/// let greeting = engine.execute(&command).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CommandEngine {
    clock: Clock,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    bulkheads: RwLock<HashMap<String, Arc<Bulkhead>>>,
    caches: CacheRegistry,
}

impl CommandEngine {
    /// Creates an engine observing the given clock.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            breakers: RwLock::new(HashMap::new()),
            bulkheads: RwLock::new(HashMap::new()),
            caches: CacheRegistry::new(),
        }
    }

    /// Executes a command, blocking the caller until the outcome.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`ApiError`] after policy exhaustion: the last attempt's
    /// failure, or a fast rejection from the breaker or bulkhead.
    pub async fn execute<T>(&self, command: &Command<T>) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.submit(command, CancellationToken::new()).await
    }

    /// Submits a command for execution, returning a handle that resolves with the
    /// outcome and can cancel the invocation.
    pub fn enqueue<T>(self: &Arc<Self>, command: Command<T>) -> CommandHandle<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let engine = Arc::clone(self);

        let join = tokio::spawn(async move {
            tokio::select! {
                outcome = engine.submit(&command, token.clone()) => outcome,
                () = token.cancelled() => Err(ApiError::cancelled()),
            }
        });

        CommandHandle { join, cancellation }
    }

    /// Submits a command for execution, returning a stream that delivers the outcome
    /// exactly once. A thin adapter over [`enqueue`][Self::enqueue]; dropping the
    /// stream cancels the invocation.
    pub fn observe<T>(self: &Arc<Self>, command: Command<T>) -> impl Stream<Item = Result<T, ApiError>> + use<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        futures::stream::once(self.enqueue(command).cancel_on_drop())
    }

    /// The circuit breaker for a command name, if one has been created.
    #[must_use]
    pub fn breaker(&self, command_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(command_name).map(Arc::clone)
    }

    /// The registry of named caches shared across commands.
    #[must_use]
    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    /// The clock the engine schedules against.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    async fn submit<T>(&self, command: &Command<T>, cancellation: CancellationToken) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let breaker = self.breaker_for(command);
        let bulkhead = self.bulkhead_for(command);

        if breaker.allow() == Admission::Rejected {
            tracing::debug!(command = %command.name, "submission short-circuited");
            return finish(command, Err(ApiError::short_circuited(&command.name)));
        }

        let slot = match bulkhead.acquire().await {
            Ok(slot) => slot,
            Err(PoolFull) => {
                breaker.record(BreakerEvent::Rejected);
                tracing::debug!(command = %command.name, "submission rejected by bulkhead");
                return finish(command, Err(ApiError::pool_rejected(&command.name)));
            }
        };

        let ctx = Arc::new(CommandContext::with_attributes(
            command.name.clone(),
            command.attributes.clone(),
            cancellation,
        ));

        let outcome = match command.execution.isolation {
            IsolationMode::Semaphore => {
                // Attempts run on the submitting task; the slot is held across them.
                let outcome = run_attempts(self.clock.clone(), breaker, command.clone(), ctx).await;
                drop(slot);
                outcome
            }
            IsolationMode::Pool => {
                let clock = self.clock.clone();
                let command = command.clone();
                let worker = tokio::spawn(async move {
                    let _slot = slot;
                    run_attempts(clock, breaker, command, ctx).await
                });

                match worker.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(worker_failure(join_error)),
                }
            }
        };

        finish(command, outcome)
    }

    fn breaker_for<T>(&self, command: &Command<T>) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(&command.name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(command.name.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(command.breaker.clone(), self.clock.clone()))),
        )
    }

    fn bulkhead_for<T>(&self, command: &Command<T>) -> Arc<Bulkhead> {
        if let Some(bulkhead) = self.bulkheads.read().get(&command.name) {
            return Arc::clone(bulkhead);
        }

        let mut bulkheads = self.bulkheads.write();
        Arc::clone(
            bulkheads
                .entry(command.name.clone())
                .or_insert_with(|| Arc::new(Bulkhead::new(command.execution.isolation, &command.pool))),
        )
    }
}

/// Runs the retry loop for one admitted submission.
async fn run_attempts<T>(
    clock: Clock,
    breaker: Arc<CircuitBreaker>,
    command: Command<T>,
    ctx: Arc<CommandContext>,
) -> Result<T, ApiError>
where
    T: Clone + Send + Sync + 'static,
{
    let retry = command.retry.clone();
    let listeners = command.listeners.clone();

    retry
        .drive(&clock, &listeners, |attempt| {
            let clock = clock.clone();
            let breaker = Arc::clone(&breaker);
            let ctx = Arc::clone(&ctx);
            let provider = Arc::clone(&command.provider);
            let callback = Arc::clone(&command.callback);
            let cache = command.cache.clone();
            let hooks = command.hooks.clone();
            let name = command.name.clone();
            let budget = command.execution.attempt_timeout;

            async move {
                if ctx.is_cancelled() {
                    return Err(ApiError::cancelled());
                }

                // Cache lookup happens inside the retry loop so a value cached by a
                // competing invocation can short-circuit later attempts too.
                if let Some(binding) = &cache
                    && !binding.key.is_empty()
                {
                    let stopwatch = clock.stopwatch();
                    let lookup = binding.cache.get(&binding.key).await;
                    hooks.cache_get(&binding.key, stopwatch.elapsed(), lookup.is_hit());

                    if let Lookup::Hit(value) = lookup {
                        tracing::debug!(command = %name, key = %binding.key, "cache hit; skipping remote call");
                        return Ok(value);
                    }
                }

                let stopwatch = clock.stopwatch();
                let outcome = match clock.timeout(budget, provider.run(Arc::clone(&ctx), callback)).await {
                    Ok(Ok(value)) => {
                        breaker.record(BreakerEvent::Success);

                        if let Some(binding) = &cache
                            && !binding.key.is_empty()
                        {
                            // Best-effort; the cache logs its own failures.
                            let _ = binding.cache.put(&binding.key, &value).await;
                        }

                        Ok(value)
                    }
                    Ok(Err(error)) => {
                        match error.kind() {
                            // Permanent failures do not count against the breaker.
                            ErrorKind::NonRetryable | ErrorKind::Cancelled => {}
                            ErrorKind::Timeout => breaker.record(BreakerEvent::Timeout),
                            _ => breaker.record(BreakerEvent::Failure),
                        }
                        Err(error)
                    }
                    Err(_elapsed) => {
                        // The attempt was abandoned; a late result is discarded and
                        // never cached.
                        breaker.record(BreakerEvent::Timeout);
                        Err(ApiError::timeout(budget))
                    }
                };

                hooks.attempt(attempt, stopwatch.elapsed(), outcome.as_ref().err());
                outcome
            }
        })
        .await
}

fn finish<T>(command: &Command<T>, outcome: Result<T, ApiError>) -> Result<T, ApiError> {
    match outcome {
        Err(error)
            if command.execution.fallback_enabled
                && !matches!(error.kind(), ErrorKind::Cancelled | ErrorKind::InvalidDescriptor) =>
        {
            match &command.fallback {
                Some(fallback) => {
                    tracing::debug!(command = %command.name, %error, "returning fallback value");
                    Ok(fallback(&error))
                }
                None => Err(error),
            }
        }
        outcome => outcome,
    }
}

fn worker_failure(join_error: tokio::task::JoinError) -> ApiError {
    if join_error.is_cancelled() {
        return ApiError::cancelled();
    }

    ApiError::retryable("command worker panicked").with_source(join_error)
}

/// A pending command submission.
///
/// Resolves with the command outcome. [`cancel`][Self::cancel] aborts the retry loop
/// before the next attempt; an in-flight attempt is dropped best-effort, with the
/// cancellation also visible to the callback through its context.
#[derive(Debug)]
pub struct CommandHandle<T> {
    join: JoinHandle<Result<T, ApiError>>,
    cancellation: CancellationToken,
}

impl<T> CommandHandle<T> {
    /// Cancels the invocation. The handle then resolves with a cancelled error.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Converts into a future that cancels the invocation when dropped.
    pub(crate) fn cancel_on_drop(self) -> CancelOnDrop<T> {
        CancelOnDrop { handle: self }
    }
}

impl<T> Future for CommandHandle<T> {
    type Output = Result<T, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_error)) => Poll::Ready(Err(worker_failure(join_error))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug)]
pub(crate) struct CancelOnDrop<T> {
    handle: CommandHandle<T>,
}

impl<T> Future for CancelOnDrop<T> {
    type Output = Result<T, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

impl<T> Drop for CancelOnDrop<T> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use futures::StreamExt;
    use metronome::ClockControl;
    use url::Url;

    use crate::{BackoffPolicy, BreakerPolicy, ConstantUriProvider, UriProvider};

    use super::*;

    fn instant_clock() -> Clock {
        ClockControl::new().auto_advance_timers(true).to_clock()
    }

    fn provider() -> Arc<dyn UriProvider<String>> {
        Arc::new(ConstantUriProvider::new(Url::parse("http://svc.local/").unwrap()))
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(CommandEngine: Send, Sync);
        static_assertions::assert_impl_all!(CommandHandle<String>: Send, Future);
    }

    #[tokio::test]
    async fn execute_returns_callback_value() {
        let engine = CommandEngine::new(instant_clock());
        let command = Command::builder()
            .name("Echo")
            .uri_provider(provider())
            .callback(|_, url| async move { Ok(url.as_str().to_owned()) })
            .build()
            .unwrap();

        let result = engine.execute(&command).await.unwrap();

        assert_eq!(result, "http://svc.local/");
    }

    #[tokio::test]
    async fn context_carries_attributes_to_callback() {
        let engine = CommandEngine::new(instant_clock());
        let command = Command::builder()
            .name("WithAttrs")
            .uri_provider(provider())
            .attribute("tenant", "acme".to_owned())
            .callback(|ctx, _| async move {
                assert_eq!(ctx.command_name(), "WithAttrs");
                Ok((*ctx.get::<String>("tenant").unwrap()).clone())
            })
            .build()
            .unwrap();

        assert_eq!(engine.execute(&command).await.unwrap(), "acme");
    }

    #[tokio::test]
    async fn semaphore_isolation_runs_inline() {
        let engine = CommandEngine::new(instant_clock());
        let command = Command::builder()
            .name("Inline")
            .isolation(IsolationMode::Semaphore)
            .uri_provider(provider())
            .callback(|_, _| async { Ok("ok".to_owned()) })
            .build()
            .unwrap();

        assert_eq!(engine.execute(&command).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn breaker_and_bulkhead_are_created_once_per_name() {
        let engine = CommandEngine::new(instant_clock());
        let command = Command::builder()
            .name("Shared")
            .uri_provider(provider())
            .callback(|_, _| async { Ok("ok".to_owned()) })
            .build()
            .unwrap();

        assert!(engine.breaker("Shared").is_none());

        engine.execute(&command).await.unwrap();
        let first = engine.breaker("Shared").unwrap();

        engine.execute(&command).await.unwrap();
        let second = engine.breaker("Shared").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn attempt_budget_produces_timeout_kind() {
        let control = ClockControl::new();
        let engine = Arc::new(CommandEngine::new(control.to_clock()));
        let clock = engine.clock().clone();

        let command = Command::builder()
            .name("Slow")
            .max_attempts(1)
            .attempt_timeout(Duration::from_millis(100))
            .uri_provider(provider())
            .callback(move |_, _| {
                let clock = clock.clone();
                async move {
                    clock.delay(Duration::from_secs(10)).await;
                    Ok("too late".to_owned())
                }
            })
            .build()
            .unwrap();

        let handle = engine.enqueue(command);
        tokio::task::yield_now().await;

        // Advance past the budget but not past the callback's own latency.
        control.advance(Duration::from_millis(150));
        let error = handle.await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Timeout);
        let counts = engine.breaker("Slow").unwrap().snapshot().counts;
        assert_eq!(counts.timeout, 1);
    }

    #[tokio::test]
    async fn enqueue_resolves_like_execute() {
        let engine = Arc::new(CommandEngine::new(instant_clock()));
        let command = Command::builder()
            .name("Queued")
            .uri_provider(provider())
            .callback(|_, _| async { Ok("queued".to_owned()) })
            .build()
            .unwrap();

        let handle = engine.enqueue(command);

        assert_eq!(handle.await.unwrap(), "queued");
    }

    #[tokio::test]
    async fn cancelled_handle_yields_cancelled_error() {
        let engine = Arc::new(CommandEngine::new(Clock::new_frozen()));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_callback = Arc::clone(&calls);

        let command = Command::builder()
            .name("Cancelled")
            .max_attempts(5)
            .backoff(BackoffPolicy::constant(Duration::from_secs(3600)))
            .uri_provider(provider())
            .callback(move |_, _| {
                calls_in_callback.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(ApiError::retryable("keep trying")) }
            })
            .build()
            .unwrap();

        // The frozen clock parks the loop in its first backoff sleep.
        let handle = engine.enqueue(command);
        tokio::task::yield_now().await;

        handle.cancel();
        let error = handle.await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observe_delivers_exactly_once() {
        let engine = Arc::new(CommandEngine::new(instant_clock()));
        let command = Command::builder()
            .name("Observed")
            .uri_provider(provider())
            .callback(|_, _| async { Ok("observed".to_owned()) })
            .build()
            .unwrap();

        let mut stream = Box::pin(engine.observe(command));

        assert_eq!(stream.next().await.unwrap().unwrap(), "observed");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn fallback_applies_to_terminal_failure() {
        let engine = CommandEngine::new(instant_clock());
        let command = Command::builder()
            .name("FallsBack")
            .max_attempts(2)
            .backoff(BackoffPolicy::constant(Duration::ZERO))
            .uri_provider(provider())
            .callback(|_, _| async { Err(ApiError::retryable("down")) })
            .fallback(|error| format!("fallback after {}", error.kind()))
            .build()
            .unwrap();

        let result = engine.execute(&command).await.unwrap();

        assert_eq!(result, "fallback after retryable");
    }

    #[tokio::test]
    async fn fallback_applies_to_short_circuit() {
        let engine = CommandEngine::new(instant_clock());
        let command = Command::builder()
            .name("ForcedOpen")
            .breaker_policy(BreakerPolicy {
                forced: Some(crate::ForcedState::Open),
                ..BreakerPolicy::default()
            })
            .uri_provider(provider())
            .callback(|_, _| async { Ok("never".to_owned()) })
            .fallback(|_| "static answer".to_owned())
            .build()
            .unwrap();

        assert_eq!(engine.execute(&command).await.unwrap(), "static answer");
    }
}

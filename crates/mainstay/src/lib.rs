// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fault-tolerant execution of remote calls.
//!
//! # Why?
//!
//! Clients of remote HTTP/RPC services must tolerate partial failure: transient
//! network errors, slow hosts, and degraded dependencies. This crate wraps an
//! arbitrary user-supplied remote invocation in a composable pipeline of service
//! discovery, bounded concurrency with circuit breaking, retry with backoff, and
//! optional result caching — so one bad dependency degrades gracefully instead of
//! taking the caller down with it.
//!
//! # Overview
//!
//! A caller describes one logical remote operation as a [`Command`]: a name, a
//! [`UriProvider`] resolving the base endpoint per attempt, the remote callback, and
//! the policies it runs under. Commands are submitted to a [`CommandEngine`], which
//! owns the per-command-name circuit breakers, bulkheads, and named caches.
//!
//! One submission flows as: breaker admission → bulkhead slot → retry loop, where
//! each attempt consults the bound cache (a hit short-circuits), resolves an
//! endpoint, runs the callback under the per-attempt latency budget, and stores a
//! successful result back. Failures are classified — transient ones reschedule under
//! the backoff policy, permanent ones abort — and every outcome feeds the breaker's
//! rolling statistics.
//!
//! # Core Types
//!
//! - [`Command`] / [`CommandBuilder`] - The immutable descriptor and its builder.
//! - [`CommandEngine`] - Execution: [`execute`][CommandEngine::execute],
//!   [`enqueue`][CommandEngine::enqueue], [`observe`][CommandEngine::observe].
//! - [`ApiError`] / [`ErrorKind`] / [`Classifier`] - The failure taxonomy.
//! - [`CircuitBreaker`] / [`BreakerPolicy`] - Failure-density short-circuiting.
//! - [`RetryPolicy`] / [`BackoffPolicy`] / [`RetryListeners`] - The retry driver.
//! - [`ConstantUriProvider`] / [`DiscoveryUriProvider`] - Built-in endpoint
//!   resolution strategies.
//! - [`CommandContext`] - Per-invocation attributes and cancellation.
//! - [`ClientConfiguration`] - Property-store binding for per-command policies.
//! - [`HealthCheck`] - Externally callable health probes.
//!
//! Caching lives in the `stash` crate and binds to commands through
//! [`CommandBuilder::cache`]; time lives in the `metronome` crate so tests control
//! every sleep, timeout, and rolling window deterministically.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mainstay::{BackoffPolicy, Command, CommandEngine, ConstantUriProvider, UriProvider};
//! use metronome::Clock;
//! use url::Url;
//!
//! # async fn example() -> Result<(), mainstay::ApiError> {
//! let engine = CommandEngine::new(Clock::new_tokio());
//!
//! let provider: Arc<dyn UriProvider<String>> =
//!     Arc::new(ConstantUriProvider::new(Url::parse("http://somehost.com/").unwrap()));
//!
//! let command = Command::builder()
//!     .name("GetResource")
//!     .uri_provider(provider)
//!     .callback(|_ctx, base| async move {
//!         // Perform the remote call against `base` here.
//!         Ok(base.to_string())
//!     })
//!     .max_attempts(3)
//!     .backoff(BackoffPolicy::exponential(Duration::from_millis(500)))
//!     .attempt_timeout(Duration::from_secs(8))
//!     .build()?;
//!
//! let value = engine.execute(&command).await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod breaker;
mod command;
mod config;
mod context;
mod engine;
mod errors;
mod health;
mod pool;
mod provider;
mod retry;

pub use backoff::{Backoff, BackoffPolicy};
pub use breaker::{
    Admission, BreakerEvent, BreakerPolicy, BreakerSnapshot, BreakerState, CircuitBreaker, Counts, ExecutionMode,
    ForcedState,
};
pub use command::{CacheBinding, Command, CommandBuilder, CommandHooks, ExecutionPolicy};
pub use config::{CacheSettings, ClientConfiguration, CommandSettings, Properties};
pub use context::{AttributeValue, CommandContext};
pub use engine::{CommandEngine, CommandHandle};
pub use errors::{ApiError, Classifier, ErrorKind};
pub use health::{
    BreakerFailureCheck, CompositeHealthCheck, DiscoveryCheck, HealthCheck, HealthCheckResult, HealthStatus,
};
pub use pool::{IsolationMode, PoolPolicy};
pub use provider::{
    ConstantUriProvider, DiscoveryUriProvider, RemoteCall, SelectionStrategy, ServiceInstance, ServiceRegistry,
    StaticRegistry, UriProvider,
};
pub use retry::{Attempt, RetryListeners, RetryPolicy};

use std::sync::Arc;

/// The capability set a service client exposes.
///
/// Anything that names its service, resolves configuration, and submits through an
/// engine is a client — no base-class hierarchy required. Concrete clients add their
/// transport on top and build [`Command`]s per operation.
pub trait Client {
    /// The logical name of the remote service this client fronts.
    fn service_name(&self) -> &str;

    /// The configuration this client resolves policies from.
    fn configuration(&self) -> &ClientConfiguration;

    /// The engine this client submits through.
    fn engine(&self) -> &Arc<CommandEngine>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BillingClient {
        config: ClientConfiguration,
        engine: Arc<CommandEngine>,
    }

    impl Client for BillingClient {
        fn service_name(&self) -> &str {
            "billing"
        }

        fn configuration(&self) -> &ClientConfiguration {
            &self.config
        }

        fn engine(&self) -> &Arc<CommandEngine> {
            &self.engine
        }
    }

    #[tokio::test]
    async fn client_capability_set_composes() {
        let client = BillingClient {
            config: ClientConfiguration::new("billing"),
            engine: Arc::new(CommandEngine::new(metronome::Clock::new_frozen())),
        };

        assert_eq!(client.service_name(), "billing");

        let settings = client.configuration().command_settings("GetInvoice");
        let command = Command::builder()
            .name("GetInvoice")
            .max_attempts(settings.max_attempts)
            .execution_policy(settings.execution)
            .breaker_policy(settings.breaker)
            .pool_policy(settings.pool)
            .uri_provider(Arc::new(ConstantUriProvider::new(
                url::Url::parse("http://billing.local/").unwrap(),
            )))
            .callback(|_, _| async { Ok("invoice".to_owned()) })
            .build()
            .unwrap();

        assert_eq!(client.engine().execute(&command).await.unwrap(), "invoice");
    }
}

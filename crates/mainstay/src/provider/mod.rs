// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Strategies for resolving the base endpoint of each attempt.
//!
//! A provider owns one attempt's endpoint resolution and callback invocation. It must
//! not retry internally — the retry driver re-enters the provider for each attempt,
//! which is how discovery-backed providers rotate to a different instance after a
//! failure.

mod discovery;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use url::Url;

use crate::{ApiError, CommandContext};

pub use discovery::{
    DiscoveryUriProvider, SelectionStrategy, ServiceInstance, ServiceRegistry, StaticRegistry,
};

/// The user-supplied remote invocation.
///
/// Receives the per-invocation context and the base endpoint resolved for this
/// attempt; performs the actual remote call. Must tolerate execution on any task and
/// should observe [`CommandContext::cancellation`] during long I/O.
pub type RemoteCall<T> = Arc<dyn Fn(Arc<CommandContext>, Url) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

/// Resolves a base endpoint for one attempt and invokes the callback with it.
///
/// Fails with a retryable no-instance error when resolution comes up empty, and
/// propagates callback errors unchanged (after any instance-health bookkeeping).
#[async_trait]
pub trait UriProvider<T>: Send + Sync {
    /// Runs one attempt: resolve an endpoint, invoke `call` against it.
    async fn run(&self, ctx: Arc<CommandContext>, call: RemoteCall<T>) -> Result<T, ApiError>;
}

/// A provider that returns a fixed base endpoint on every attempt. Stateless.
///
/// # Examples
///
/// ```
/// use mainstay::ConstantUriProvider;
/// use url::Url;
///
/// let provider = ConstantUriProvider::new(Url::parse("http://somehost.com/").unwrap());
/// assert_eq!(provider.base().as_str(), "http://somehost.com/");
/// ```
#[derive(Debug, Clone)]
pub struct ConstantUriProvider {
    base: Url,
}

impl ConstantUriProvider {
    /// Creates a provider always resolving to `base`.
    #[must_use]
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// The fixed base endpoint.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl<T: Send + 'static> UriProvider<T> for ConstantUriProvider {
    async fn run(&self, ctx: Arc<CommandContext>, call: RemoteCall<T>) -> Result<T, ApiError> {
        call(ctx, self.base.clone()).await
    }
}

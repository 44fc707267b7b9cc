// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metronome::Clock;
use parking_lot::Mutex;
use url::Url;

use crate::{ApiError, CommandContext, ErrorKind, RemoteCall, UriProvider};

const DEFAULT_MAX_ERROR_MARKS: u32 = 3;
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// One discovered instance of a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Stable identifier within the discovery session.
    pub id: String,
    /// Base endpoint for requests to this instance.
    pub base: Url,
}

impl ServiceInstance {
    /// Creates an instance record.
    pub fn new(id: impl Into<String>, base: Url) -> Self {
        Self { id: id.into(), base }
    }
}

/// A source of discovered instances for a service.
///
/// Implementations wrap whatever registry the application uses; the framework only
/// needs the current instance list.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// The current instances of `service`.
    async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, ApiError>;
}

/// A registry serving a fixed instance list; the static-discovery strategy and the
/// workhorse of tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    instances: Vec<ServiceInstance>,
}

impl StaticRegistry {
    /// Creates a registry serving the given instances for every service name.
    #[must_use]
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn instances(&self, _service: &str) -> Result<Vec<ServiceInstance>, ApiError> {
        Ok(self.instances.clone())
    }
}

/// How the pool picks among available instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Rotate through available instances in order.
    #[default]
    RoundRobin,

    /// Pick uniformly at random.
    Random,

    /// Pick randomly, weighted against instances carrying error marks.
    Weighted,
}

#[derive(Debug)]
struct PooledInstance {
    instance: ServiceInstance,
    error_marks: u32,
    available: bool,
}

#[derive(Debug, Default)]
struct InstancePool {
    instances: Vec<PooledInstance>,
    cursor: usize,
    refreshed_at: Option<Instant>,
}

impl InstancePool {
    fn absorb(&mut self, discovered: Vec<ServiceInstance>, now: Instant) {
        // Keep health bookkeeping for instances that survived rediscovery.
        let mut refreshed = Vec::with_capacity(discovered.len());
        for instance in discovered {
            let (error_marks, available) = self
                .instances
                .iter()
                .find(|p| p.instance.id == instance.id)
                .map_or((0, true), |p| (p.error_marks, p.available));

            refreshed.push(PooledInstance {
                instance,
                error_marks,
                available,
            });
        }

        self.instances = refreshed;
        self.refreshed_at = Some(now);
    }

    fn available(&self) -> impl Iterator<Item = (usize, &PooledInstance)> {
        self.instances.iter().enumerate().filter(|(_, p)| p.available)
    }

    // `roll` is a uniform sample from [0, 1); taking it as a parameter keeps
    // selection deterministic under test while production draws from `fastrand`.
    fn select(&mut self, strategy: SelectionStrategy, roll: f64) -> Option<ServiceInstance> {
        let candidates: Vec<usize> = self.available().map(|(i, _)| i).collect();
        if candidates.is_empty() {
            return None;
        }

        let picked = match strategy {
            SelectionStrategy::RoundRobin => {
                let index = candidates[self.cursor % candidates.len()];
                self.cursor = self.cursor.wrapping_add(1);
                index
            }
            SelectionStrategy::Random => {
                #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "index fits")]
                let pick = (roll * candidates.len() as f64) as usize;
                candidates[pick.min(candidates.len() - 1)]
            }
            SelectionStrategy::Weighted => {
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|&i| 1.0 / f64::from(1 + self.instances[i].error_marks))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut remaining = roll * total;

                let mut picked = candidates[candidates.len() - 1];
                for (&index, weight) in candidates.iter().zip(&weights) {
                    if remaining < *weight {
                        picked = index;
                        break;
                    }
                    remaining -= weight;
                }
                picked
            }
        };

        Some(self.instances[picked].instance.clone())
    }
}

/// A provider backed by service discovery.
///
/// Each attempt resolves an instance from the pool and runs the callback against its
/// base endpoint. A retryable callback failure marks the instance so the pool
/// deprioritizes it — enough marks and the instance drops out of selection until it
/// recovers; a success clears its marks. The provider never retries internally: the
/// retry driver re-enters it, which is what rotates attempts onto other instances.
pub struct DiscoveryUriProvider {
    registry: Arc<dyn ServiceRegistry>,
    service: String,
    strategy: SelectionStrategy,
    max_error_marks: u32,
    refresh_interval: Duration,
    clock: Clock,
    pool: Mutex<InstancePool>,
}

impl DiscoveryUriProvider {
    /// Creates a provider for `service`, with round-robin selection.
    pub fn new(registry: Arc<dyn ServiceRegistry>, service: impl Into<String>, clock: Clock) -> Self {
        Self {
            registry,
            service: service.into(),
            strategy: SelectionStrategy::default(),
            max_error_marks: DEFAULT_MAX_ERROR_MARKS,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            clock,
            pool: Mutex::new(InstancePool::default()),
        }
    }

    /// Replaces the selection strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Error marks after which an instance drops out of selection.
    #[must_use]
    pub fn max_error_marks(mut self, marks: u32) -> Self {
        self.max_error_marks = marks.max(1);
        self
    }

    /// How long a discovery result is trusted before the registry is re-queried.
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// The service name this provider discovers.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The number of instances currently eligible for selection.
    #[must_use]
    pub fn available_instances(&self) -> usize {
        self.pool.lock().available().count()
    }

    /// Penalizes an instance after a failure observed against it.
    pub fn note_error(&self, instance_id: &str) {
        let mut pool = self.pool.lock();
        if let Some(pooled) = pool.instances.iter_mut().find(|p| p.instance.id == instance_id) {
            pooled.error_marks = pooled.error_marks.saturating_add(1);
            if pooled.error_marks >= self.max_error_marks {
                pooled.available = false;
                tracing::warn!(
                    service = %self.service,
                    instance = instance_id,
                    marks = pooled.error_marks,
                    "instance removed from selection after repeated errors",
                );
            }
        }
    }

    /// Clears an instance's penalty after a success observed against it.
    pub fn note_success(&self, instance_id: &str) {
        let mut pool = self.pool.lock();
        if let Some(pooled) = pool.instances.iter_mut().find(|p| p.instance.id == instance_id) {
            pooled.error_marks = 0;
            pooled.available = true;
        }
    }

    async fn resolve(&self) -> Result<ServiceInstance, ApiError> {
        let now = self.clock.instant();

        let needs_refresh = {
            let pool = self.pool.lock();
            let stale = pool
                .refreshed_at
                .is_none_or(|at| now.duration_since(at) >= self.refresh_interval);
            stale || pool.available().next().is_none()
        };

        if needs_refresh {
            let discovered = self.registry.instances(&self.service).await?;
            self.pool.lock().absorb(discovered, now);
        }

        self.pool
            .lock()
            .select(self.strategy, fastrand::f64())
            .ok_or_else(|| ApiError::no_instance(&self.service))
    }
}

impl std::fmt::Debug for DiscoveryUriProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryUriProvider")
            .field("service", &self.service)
            .field("strategy", &self.strategy)
            .field("available", &self.available_instances())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send + 'static> UriProvider<T> for DiscoveryUriProvider {
    async fn run(&self, ctx: Arc<CommandContext>, call: RemoteCall<T>) -> Result<T, ApiError> {
        let instance = self.resolve().await?;
        tracing::debug!(service = %self.service, instance = %instance.id, "dispatching to instance");

        match call(ctx, instance.base.clone()).await {
            Ok(value) => {
                self.note_success(&instance.id);
                Ok(value)
            }
            Err(error) => {
                if error.kind() != ErrorKind::NonRetryable {
                    self.note_error(&instance.id);
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance::new(id, Url::parse(&format!("http://{id}.local/")).unwrap())
    }

    fn provider(ids: &[&str]) -> DiscoveryUriProvider {
        let registry = StaticRegistry::new(ids.iter().map(|id| instance(id)).collect());
        DiscoveryUriProvider::new(Arc::new(registry), "svc", Clock::new_frozen())
    }

    fn echo_url() -> RemoteCall<String> {
        Arc::new(|_, url| Box::pin(async move { Ok(url.as_str().to_owned()) }))
    }

    #[tokio::test]
    async fn round_robin_rotates_instances() {
        let provider = provider(&["a", "b"]);
        let ctx = Arc::new(CommandContext::new("cmd"));

        let first = provider.run(Arc::clone(&ctx), echo_url()).await.unwrap();
        let second = provider.run(Arc::clone(&ctx), echo_url()).await.unwrap();
        let third = provider.run(ctx, echo_url()).await.unwrap();

        assert_eq!(first, "http://a.local/");
        assert_eq!(second, "http://b.local/");
        assert_eq!(third, "http://a.local/");
    }

    #[tokio::test]
    async fn empty_pool_is_no_instance() {
        let provider = provider(&[]);
        let ctx = Arc::new(CommandContext::new("cmd"));

        let result: Result<String, _> = provider.run(ctx, echo_url()).await;

        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Retryable);
        assert!(error.to_string().contains("no available instances"));
    }

    #[tokio::test]
    async fn retryable_failure_marks_the_instance() {
        let provider = provider(&["a", "b"]).max_error_marks(1);
        let ctx = Arc::new(CommandContext::new("cmd"));

        let failing: RemoteCall<String> = Arc::new(|_, url| {
            Box::pin(async move {
                if url.as_str().contains("a.local") {
                    Err(ApiError::retryable("connection refused"))
                } else {
                    Ok(url.as_str().to_owned())
                }
            })
        });

        let _ = provider.run(Arc::clone(&ctx), failing.clone()).await;
        assert_eq!(provider.available_instances(), 1);

        // The next attempt lands on the healthy instance.
        let result = provider.run(ctx, failing).await.unwrap();
        assert_eq!(result, "http://b.local/");
    }

    #[tokio::test]
    async fn non_retryable_failure_does_not_mark() {
        let provider = provider(&["a"]).max_error_marks(1);
        let ctx = Arc::new(CommandContext::new("cmd"));

        let failing: RemoteCall<String> =
            Arc::new(|_, _| Box::pin(async { Err(ApiError::non_retryable("bad request")) }));

        let _ = provider.run(ctx, failing).await;

        assert_eq!(provider.available_instances(), 1);
    }

    #[tokio::test]
    async fn success_clears_error_marks() {
        let provider = provider(&["a"]).max_error_marks(2);
        provider.resolve().await.unwrap();

        provider.note_error("a");
        let ctx = Arc::new(CommandContext::new("cmd"));
        provider.run(ctx, echo_url()).await.unwrap();

        provider.note_error("a");
        assert_eq!(provider.available_instances(), 1);
    }

    #[tokio::test]
    async fn all_instances_marked_is_no_instance_with_static_registry() {
        let provider = provider(&["a"]).max_error_marks(1);
        provider.resolve().await.unwrap();
        provider.note_error("a");

        // Refresh re-absorbs the same instance but keeps its bookkeeping.
        let result = provider.resolve().await;

        assert!(result.is_err());
        assert_eq!(provider.available_instances(), 0);
    }

    #[tokio::test]
    async fn weighted_selection_prefers_unmarked() {
        let provider = provider(&["a", "b"]).strategy(SelectionStrategy::Weighted);
        provider.resolve().await.unwrap();

        provider.note_error("a");
        provider.note_error("a");

        // Weights: a = 1/3, b = 1. 0.6 * (4/3) = 0.8 ≥ 1/3, lands on b.
        let picked = provider.pool.lock().select(SelectionStrategy::Weighted, 0.6);
        assert_eq!(picked.unwrap().id, "b");

        // A roll under a's weight still lands on a.
        let picked = provider.pool.lock().select(SelectionStrategy::Weighted, 0.1);
        assert_eq!(picked.unwrap().id, "a");
    }

    #[tokio::test]
    async fn random_selection_stays_in_bounds() {
        let provider = provider(&["a", "b", "c"]).strategy(SelectionStrategy::Random);
        provider.resolve().await.unwrap();

        let picked = provider.pool.lock().select(SelectionStrategy::Random, 0.999);
        assert_eq!(picked.unwrap().id, "c");

        let picked = provider.pool.lock().select(SelectionStrategy::Random, 0.0);
        assert_eq!(picked.unwrap().id, "a");
    }

    #[tokio::test]
    async fn registry_requeried_after_refresh_interval() {
        #[derive(Default)]
        struct CountingRegistry {
            calls: std::sync::atomic::AtomicU32,
        }

        #[async_trait]
        impl ServiceRegistry for CountingRegistry {
            async fn instances(&self, _service: &str) -> Result<Vec<ServiceInstance>, ApiError> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![instance("a")])
            }
        }

        let control = metronome::ClockControl::new();
        let registry = Arc::new(CountingRegistry::default());
        let provider = DiscoveryUriProvider::new(
            Arc::clone(&registry) as Arc<dyn ServiceRegistry>,
            "svc",
            control.to_clock(),
        )
        .refresh_interval(Duration::from_secs(30));

        provider.resolve().await.unwrap();
        provider.resolve().await.unwrap();
        assert_eq!(registry.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        control.advance(Duration::from_secs(31));
        provider.resolve().await.unwrap();
        assert_eq!(registry.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use async_trait::async_trait;

use crate::breaker::CircuitBreaker;
use crate::provider::DiscoveryUriProvider;

/// The verdict of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The checked dependency looks usable.
    Healthy,
    /// The checked dependency looks broken.
    Unhealthy,
    /// The check could not decide.
    Unknown,
}

/// A health verdict with an optional human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    status: HealthStatus,
    message: Option<String>,
}

impl HealthCheckResult {
    /// A healthy verdict.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// An unhealthy verdict with an explanation.
    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }

    /// An undecided verdict.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: None,
        }
    }

    /// The verdict.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// The explanation, when one was recorded.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// An externally callable health probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// A name identifying this check in reports.
    fn name(&self) -> &str;

    /// Runs the check.
    async fn check(&self) -> HealthCheckResult;
}

/// Reports unhealthy when a command's rolling failure count reaches a threshold.
///
/// Failures and timeouts both count; the window is the breaker's rolling window, so
/// the verdict recovers on its own as old failures slide out.
pub struct BreakerFailureCheck {
    name: String,
    breaker: Arc<CircuitBreaker>,
    min_failures: u32,
}

impl BreakerFailureCheck {
    /// Creates a check over `breaker` reporting unhealthy at `min_failures` rolling
    /// failures.
    pub fn new(name: impl Into<String>, breaker: Arc<CircuitBreaker>, min_failures: u32) -> Self {
        Self {
            name: name.into(),
            breaker,
            min_failures: min_failures.max(1),
        }
    }
}

#[async_trait]
impl HealthCheck for BreakerFailureCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthCheckResult {
        let counts = self.breaker.snapshot().counts;
        let failures = counts.failure.saturating_add(counts.timeout);

        if failures >= self.min_failures {
            HealthCheckResult::unhealthy(format!(
                "{failures} failures in the rolling window (threshold {})",
                self.min_failures
            ))
        } else {
            HealthCheckResult::healthy()
        }
    }
}

/// Reports unhealthy when discovery sees fewer instances than required.
pub struct DiscoveryCheck {
    name: String,
    provider: Arc<DiscoveryUriProvider>,
    min_instances: usize,
}

impl DiscoveryCheck {
    /// Creates a check requiring at least `min_instances` available instances.
    pub fn new(name: impl Into<String>, provider: Arc<DiscoveryUriProvider>, min_instances: usize) -> Self {
        Self {
            name: name.into(),
            provider,
            min_instances: min_instances.max(1),
        }
    }
}

#[async_trait]
impl HealthCheck for DiscoveryCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthCheckResult {
        let available = self.provider.available_instances();

        if available < self.min_instances {
            HealthCheckResult::unhealthy(format!(
                "{available} available instances for service {} (minimum {})",
                self.provider.service(),
                self.min_instances
            ))
        } else {
            HealthCheckResult::healthy()
        }
    }
}

/// Aggregates several checks into one verdict: unhealthy if any check is unhealthy,
/// unknown if none is unhealthy but any is undecided, healthy otherwise.
///
/// An empty composite reports unknown.
#[derive(Default)]
pub struct CompositeHealthCheck {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl CompositeHealthCheck {
    /// An empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a check.
    #[must_use]
    pub fn with(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Runs every check and folds the verdicts.
    pub async fn check_all(&self) -> HealthCheckResult {
        if self.checks.is_empty() {
            return HealthCheckResult::unknown();
        }

        let mut undecided = false;

        for check in &self.checks {
            let result = check.check().await;
            match result.status() {
                HealthStatus::Unhealthy => {
                    tracing::warn!(check = check.name(), message = result.message(), "health check failed");
                    return HealthCheckResult::unhealthy(format!(
                        "{}: {}",
                        check.name(),
                        result.message().unwrap_or("unhealthy")
                    ));
                }
                HealthStatus::Unknown => undecided = true,
                HealthStatus::Healthy => {}
            }
        }

        if undecided {
            HealthCheckResult::unknown()
        } else {
            HealthCheckResult::healthy()
        }
    }
}

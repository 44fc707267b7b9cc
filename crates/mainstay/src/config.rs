// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runtime configuration resolved from an external property store.
//!
//! The engine itself is configured through descriptors; this layer exists so that
//! deployments can bind a flat property store (environment, config service, files)
//! to per-command policies without code changes. Properties are addressed as
//! `<prefix>.client.<option>` with per-command overrides at
//! `<prefix>.client.<option>.<command>` or `<prefix>.client.command.<command>.<option>`,
//! mirroring the shape remote-client deployments conventionally use.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use stash::{BackendKind, CacheConfig};

use crate::{BreakerPolicy, ExecutionPolicy, ForcedState, IsolationMode, PoolPolicy};

const DEFAULT_NUM_RETRIES: u32 = 3;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_HEALTH_MIN_FAILURES: u32 = 1;
const DEFAULT_ACCEPT_TYPES: &str = "application/json";

// An execution timeout can be disabled per command, but the engine never waits
// unbounded; disabling clamps the budget here instead.
const DISABLED_TIMEOUT_BUDGET: Duration = Duration::from_secs(3600);

/// A flat string property store.
///
/// # Examples
///
/// ```
/// use mainstay::Properties;
///
/// let props: Properties = [("svc.client.numRetries", "5")].into_iter().collect();
/// assert_eq!(props.get("svc.client.numRetries"), Some("5"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// The raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The value for a key parsed as `T`; unparsable values read as absent with a
    /// log record.
    #[must_use]
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, raw, "unparsable property value; using default");
                None
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Per-command settings resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSettings {
    /// Attempt budget, counting the first try.
    pub max_attempts: u32,
    /// Circuit-breaker policy.
    pub breaker: BreakerPolicy,
    /// Bulkhead policy.
    pub pool: PoolPolicy,
    /// Execution-shape policy.
    pub execution: ExecutionPolicy,
}

/// Per-cache settings resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Which backend to build, when one is configured.
    pub kind: Option<BackendKind>,
    /// Backend config, with the `enabled` gate applied.
    pub config: CacheConfig,
}

/// Client-wide configuration bound to a property store under a prefix.
///
/// Every getter returns the documented default when the store has no value, so an
/// empty store yields a fully working configuration.
///
/// # Examples
///
/// ```
/// use mainstay::{ClientConfiguration, Properties};
///
/// let props: Properties = [
///     ("billing.client.numRetries", "5"),
///     ("billing.client.numRetries.GetInvoice", "1"),
/// ]
/// .into_iter()
/// .collect();
///
/// let config = ClientConfiguration::with_properties("billing", props);
/// assert_eq!(config.num_retries(None), 5);
/// assert_eq!(config.num_retries(Some("GetInvoice")), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    prefix: String,
    props: Properties,
}

impl ClientConfiguration {
    /// A configuration over an empty store; every getter returns its default.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_properties(prefix, Properties::new())
    }

    /// A configuration over the given store.
    #[must_use]
    pub fn with_properties(prefix: impl Into<String>, props: Properties) -> Self {
        Self {
            prefix: prefix.into(),
            props,
        }
    }

    /// The configuration prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The underlying property store.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.props
    }

    /// Max attempts, globally or per command. Default 3; the first attempt counts,
    /// so 3 means the initial attempt plus two retries.
    #[must_use]
    pub fn num_retries(&self, command: Option<&str>) -> u32 {
        self.scoped("numRetries", command).unwrap_or(DEFAULT_NUM_RETRIES)
    }

    /// Connection timeout for the external transport. Default 2000 ms.
    #[must_use]
    pub fn connect_timeout(&self, command: Option<&str>) -> Duration {
        self.scoped("connectTimeout", command)
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_millis)
    }

    /// Request timeout for the external transport. Default 2000 ms.
    #[must_use]
    pub fn request_timeout(&self, command: Option<&str>) -> Duration {
        self.scoped("requestTimeout", command)
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis)
    }

    /// Resolves the full per-command settings.
    #[must_use]
    pub fn command_settings(&self, command: &str) -> CommandSettings {
        CommandSettings {
            max_attempts: self.num_retries(Some(command)),
            breaker: self.breaker_policy(command),
            pool: self.pool_policy(command),
            execution: self.execution_policy(command),
        }
    }

    fn breaker_policy(&self, command: &str) -> BreakerPolicy {
        let defaults = BreakerPolicy::default();

        let forced = match (
            self.command_option(command, "circuitBreakerForceOpen").unwrap_or(false),
            self.command_option(command, "circuitBreakerForceClosed").unwrap_or(false),
        ) {
            (true, _) => Some(ForcedState::Open),
            (false, true) => Some(ForcedState::Closed),
            (false, false) => None,
        };

        BreakerPolicy {
            enabled: self
                .command_option(command, "circuitBreakerEnabled")
                .unwrap_or(defaults.enabled),
            error_threshold: self
                .command_option::<f32>(command, "circuitBreakerErrorThresholdPercentage")
                .map_or(defaults.error_threshold, |pct| pct / 100.0),
            sampling_window: self
                .command_option(command, "metricsRollingStatisticalWindowInMilliseconds")
                .map_or(defaults.sampling_window, Duration::from_millis),
            buckets: self
                .command_option(command, "metricsRollingStatisticalWindowBuckets")
                .unwrap_or(defaults.buckets),
            min_volume: self
                .command_option(command, "circuitBreakerRequestVolumeThreshold")
                .unwrap_or(defaults.min_volume),
            sleep_window: self
                .command_option(command, "circuitBreakerSleepWindowInMilliseconds")
                .map_or(defaults.sleep_window, Duration::from_millis),
            forced,
        }
    }

    fn pool_policy(&self, command: &str) -> PoolPolicy {
        let defaults = PoolPolicy::default();
        let key = |option: &str| format!("{}.client.threadpool.{command}.{option}", self.prefix);

        PoolPolicy {
            max_concurrency: self
                .props
                .get_parsed(&key("coreSize"))
                .unwrap_or(defaults.max_concurrency),
            max_queue: self.props.get_parsed(&key("maxQueueSize")).unwrap_or(defaults.max_queue),
            queue_rejection_threshold: self.props.get_parsed(&key("queueSizeRejectionThreshold")),
            keep_alive: self
                .props
                .get_parsed(&key("keepAliveTimeMinutes"))
                .map_or(defaults.keep_alive, |minutes: u64| Duration::from_secs(minutes * 60)),
        }
    }

    fn execution_policy(&self, command: &str) -> ExecutionPolicy {
        let defaults = ExecutionPolicy::default();

        let isolation = self
            .command_option::<String>(command, "executionIsolationStrategy")
            .map_or(defaults.isolation, |raw| match raw.to_ascii_lowercase().as_str() {
                "semaphore" => IsolationMode::Semaphore,
                "thread" => IsolationMode::Pool,
                other => {
                    tracing::warn!(command, strategy = other, "unknown isolation strategy; using thread pool");
                    IsolationMode::Pool
                }
            });

        let attempt_timeout = if self.command_option(command, "executionTimeoutEnabled").unwrap_or(true) {
            // An explicit request timeout wins over the command execution timeout.
            self.scoped("requestTimeout", Some(command))
                .map(Duration::from_millis)
                .or_else(|| {
                    self.command_option(command, "executionTimeoutInMilliseconds")
                        .map(Duration::from_millis)
                })
                .unwrap_or(defaults.attempt_timeout)
        } else {
            DISABLED_TIMEOUT_BUDGET
        };

        ExecutionPolicy {
            attempt_timeout,
            isolation,
            fallback_enabled: self
                .command_option(command, "fallbackEnabled")
                .unwrap_or(defaults.fallback_enabled),
        }
    }

    /// Resolves the settings for a named cache.
    ///
    /// `cache.<name>.enabled` gates the cache, `cache.<name>.type` selects the
    /// backend, and `cache.<name>.config` carries `k=v,k=v` backend options.
    #[must_use]
    pub fn cache_settings(&self, name: &str) -> CacheSettings {
        let key = |option: &str| format!("{}.client.cache.{name}.{option}", self.prefix);

        let kind = self.props.get(&key("type")).and_then(|raw| match raw.parse() {
            Ok(kind) => Some(kind),
            Err(error) => {
                tracing::warn!(cache = name, %error, "unknown cache type; cache disabled");
                None
            }
        });

        let mut config = self
            .props
            .get(&key("config"))
            .map(CacheConfig::parse)
            .unwrap_or_default();
        if let Some(enabled) = self.props.get_parsed(&key("enabled")) {
            config.enabled = enabled;
        }

        CacheSettings { kind, config }
    }

    /// Failure count at which the breaker health check reports unhealthy. Default 1.
    #[must_use]
    pub fn health_check_min_failures(&self) -> u32 {
        self.props
            .get_parsed(&format!("{}.client.healthCheck.minFailures", self.prefix))
            .unwrap_or(DEFAULT_HEALTH_MIN_FAILURES)
    }

    /// Default media types propagated to the transport collaborator.
    #[must_use]
    pub fn default_accept_types(&self) -> Vec<String> {
        self.props
            .get(&format!("{}.client.defaultAcceptTypes", self.prefix))
            .unwrap_or(DEFAULT_ACCEPT_TYPES)
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Whether request/response logging collaborators should log at debug verbosity.
    #[must_use]
    pub fn http_logging_debug(&self) -> bool {
        self.props
            .get_parsed(&format!("{}.client.httpLoggingDebug", self.prefix))
            .unwrap_or(false)
    }

    /// Whether response-timing instrumentation should log at debug verbosity.
    #[must_use]
    pub fn response_timing_debug(&self) -> bool {
        self.props
            .get_parsed(&format!("{}.client.responseTimingDebug", self.prefix))
            .unwrap_or(false)
    }

    /// Resolves `<prefix>.client.<option>.<command>` then `<prefix>.client.<option>`.
    fn scoped<T: FromStr>(&self, option: &str, command: Option<&str>) -> Option<T> {
        if let Some(command) = command
            && let Some(value) = self.props.get_parsed(&format!("{}.client.{option}.{command}", self.prefix))
        {
            return Some(value);
        }

        self.props.get_parsed(&format!("{}.client.{option}", self.prefix))
    }

    fn command_option<T: FromStr>(&self, command: &str, option: &str) -> Option<T> {
        self.props
            .get_parsed(&format!("{}.client.command.{command}.{option}", self.prefix))
    }
}

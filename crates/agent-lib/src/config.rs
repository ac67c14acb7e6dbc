//! Attribution configuration consumed by the core

use crate::error::ConfigError;
use std::time::Duration;

/// Supervisor process names of the container runtimes we know about.
/// The process directly below one of these is a container's boundary process.
pub const DEFAULT_SUPERVISOR_NAMES: &[&str] = &[
    "docker-containerd-shim",
    "containerd-shim",
    "containerd-shim-runc-v2",
];

/// Configuration for a sampling tick and its collaborators
#[derive(Debug, Clone)]
pub struct AttributionConfig {
    /// Interval between sampling ticks (default: 10 seconds)
    pub poll_interval: Duration,
    /// Maximum age of the runtime inventory before it is rebuilt (default: 10 seconds)
    pub cache_ttl: Duration,
    /// How long past its TTL a snapshot may still be served when a rebuild fails
    pub rebuild_grace: Duration,
    /// Upper bound for any single external call (default: 5 seconds)
    pub external_call_timeout: Duration,
    /// Number of raw GPU processes resolved concurrently
    pub worker_concurrency: usize,
    /// Names of the runtime's per-container supervisor process
    pub supervisor_names: Vec<String>,
    /// Hard cap on ancestry walk steps
    pub max_ancestry_depth: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(10),
            rebuild_grace: Duration::from_secs(60),
            external_call_timeout: Duration::from_secs(5),
            worker_concurrency: 8,
            supervisor_names: DEFAULT_SUPERVISOR_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_ancestry_depth: 1024,
        }
    }
}

impl AttributionConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn rebuild_grace(mut self, grace: Duration) -> Self {
        self.rebuild_grace = grace;
        self
    }

    pub fn external_call_timeout(mut self, timeout: Duration) -> Self {
        self.external_call_timeout = timeout;
        self
    }

    pub fn worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers;
        self
    }

    pub fn supervisor_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supervisor_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_ancestry_depth(mut self, depth: usize) -> Self {
        self.max_ancestry_depth = depth;
        self
    }

    /// Reject values the sampling loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".into()));
        }
        if self.external_call_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "external_call_timeout must be non-zero".into(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker_concurrency must be at least 1".into(),
            ));
        }
        if self.supervisor_names.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one supervisor name is required".into(),
            ));
        }
        if self.max_ancestry_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_ancestry_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

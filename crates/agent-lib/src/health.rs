//! Health check infrastructure for the GPU usage agent
//!
//! Tracks per-component health from sampling tick outcomes and answers
//! Kubernetes liveness and readiness probes.

use crate::error::SkipReason;
use crate::sampler::{TickError, TickReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<DateTime<Utc>>,
}

impl HealthResponse {
    /// Worst component status wins
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const TELEMETRY: &str = "telemetry";
    pub const INVENTORY: &str = "inventory";
    pub const SINK: &str = "sink";

    pub const ALL: [&str; 3] = [TELEMETRY, INVENTORY, SINK];
}

#[derive(Debug, Default)]
struct TickState {
    last_success: Option<DateTime<Utc>>,
}

/// Health registry fed by sampling tick outcomes
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ticks: Arc<RwLock<TickState>>,
    /// Readiness is lost when no tick succeeded for this long
    max_tick_age: Duration,
}

impl HealthRegistry {
    pub fn new(max_tick_age: Duration) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ticks: Arc::new(RwLock::new(TickState::default())),
            max_tick_age,
        }
    }

    /// Registry with every agent component registered as healthy
    pub async fn for_agent(max_tick_age: Duration) -> Self {
        let registry = Self::new(max_tick_age);
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Derive component health from a tick outcome
    pub async fn observe_tick(
        &self,
        outcome: &Result<TickReport, TickError>,
        sink_failures: usize,
    ) {
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                self.set_unhealthy(components::TELEMETRY, e.to_string()).await;
                return;
            }
        };

        self.set_healthy(components::TELEMETRY).await;

        let runtime_failures = report.tally.count(SkipReason::ExternalCallFailure)
            + report.tally.count(SkipReason::Timeout);
        if runtime_failures > 0 {
            self.set_degraded(
                components::INVENTORY,
                format!("{runtime_failures} lookups failed or timed out"),
            )
            .await;
        } else {
            self.set_healthy(components::INVENTORY).await;
        }

        if sink_failures > 0 {
            self.set_degraded(components::SINK, format!("{sink_failures} sinks failed"))
                .await;
        } else {
            self.set_healthy(components::SINK).await;
        }

        self.ticks.write().await.last_success = Some(report.timestamp);
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse {
            status,
            components,
            last_tick: self.ticks.read().await.last_success,
        }
    }

    /// Ready once a tick has succeeded recently and nothing is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let health = self.health().await;

        let reason = match health.last_tick {
            None => Some("No sampling tick has completed yet".to_string()),
            Some(at) => {
                let age = (Utc::now() - at).to_std().unwrap_or_default();
                if age > self.max_tick_age {
                    Some(format!("Last successful tick was {}s ago", age.as_secs()))
                } else if health.status == ComponentStatus::Unhealthy {
                    Some("Critical component unhealthy".to_string())
                } else {
                    None
                }
            }
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

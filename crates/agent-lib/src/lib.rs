//! Agent library for per-pod GPU memory attribution
//!
//! This crate provides the core functionality for:
//! - GPU process telemetry from the driver
//! - Attribution of GPU processes to Kubernetes workloads through the
//!   process table and the container runtime
//! - Per-tick aggregation and emission to usage sinks
//! - Health checks and observability

pub mod aggregator;
pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod models;
pub mod observability;
pub mod procfs;
pub mod resolver;
pub mod runtime;
pub mod sampler;
pub mod sink;
pub mod telemetry;

pub use aggregator::UsageAggregator;
pub use config::AttributionConfig;
pub use error::{AttributionError, SkipReason};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use resolver::{AttributionResolver, Resolution};
pub use sampler::{SamplingLoop, SamplingLoopBuilder, TickError, TickReport};

//! Destinations for aggregated GPU usage

mod influx;
mod log;
mod prometheus;

pub use self::influx::{InfluxConfig, InfluxSink};
pub use self::log::LogSink;
pub use self::prometheus::PrometheusSink;

use crate::models::GpuUsageDatum;
use anyhow::Result;

pub use async_trait::async_trait;

/// Trait for consumers of a tick's usage data
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Short name used in logs and metric labels
    fn name(&self) -> &str;

    /// Publish one tick's data. Called once per tick, possibly with no data.
    async fn emit(&self, data: &[GpuUsageDatum]) -> Result<()>;
}

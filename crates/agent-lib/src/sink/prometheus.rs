//! Prometheus gauge sink

use super::UsageSink;
use crate::models::GpuUsageDatum;
use crate::observability::AgentMetrics;
use anyhow::Result;
use async_trait::async_trait;

/// Publishes usage as the `gpu_agent_pod_gpu_memory_used_bytes` gauge family
pub struct PrometheusSink {
    metrics: AgentMetrics,
    node_name: String,
}

impl PrometheusSink {
    pub fn new(metrics: AgentMetrics, node_name: impl Into<String>) -> Self {
        Self {
            metrics,
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl UsageSink for PrometheusSink {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn emit(&self, data: &[GpuUsageDatum]) -> Result<()> {
        self.metrics.publish_usage(&self.node_name, data);
        Ok(())
    }
}

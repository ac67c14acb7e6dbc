//! Observability infrastructure for the GPU usage agent
//!
//! Provides:
//! - Prometheus metrics (tick latency, skips by reason, inventory rebuilds, per-workload GPU memory)
//! - Structured JSON logging with tracing

use crate::error::{AttributionError, SkipReason};
use crate::models::{GpuUsageDatum, RawGpuProcess};
use crate::sampler::TickReport;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default histogram buckets for tick latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Labels of the per-workload GPU memory gauge
pub const USAGE_LABELS: &[&str] = &[
    "node",
    "gpu_index",
    "gpu_uuid",
    "gpu_name",
    "namespace",
    "pod_name",
    "container_name",
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    tick_latency_seconds: Histogram,
    ticks: IntCounter,
    tick_failures: IntCounter,
    dropped_ticks: IntCounter,
    attributed_processes: IntCounter,
    skipped_processes: IntCounterVec,
    inventory_rebuilds: IntGauge,
    inventory_rebuild_failures: IntGauge,
    inventory_containers: IntGauge,
    sink_errors: IntCounterVec,
    pod_gpu_memory_used_bytes: IntGaugeVec,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "gpu_agent_tick_latency_seconds",
                "Time spent sampling, attributing and emitting one tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks: register_int_counter!(
                "gpu_agent_ticks_total",
                "Total number of completed sampling ticks"
            )
            .expect("Failed to register ticks_total"),

            tick_failures: register_int_counter!(
                "gpu_agent_tick_failures_total",
                "Total number of ticks that produced no data because GPU telemetry failed"
            )
            .expect("Failed to register tick_failures_total"),

            dropped_ticks: register_int_counter!(
                "gpu_agent_dropped_ticks_total",
                "Total number of tick starts skipped because the previous tick overran"
            )
            .expect("Failed to register dropped_ticks_total"),

            attributed_processes: register_int_counter!(
                "gpu_agent_attributed_processes_total",
                "Total number of GPU processes attributed to a workload"
            )
            .expect("Failed to register attributed_processes_total"),

            skipped_processes: register_int_counter_vec!(
                "gpu_agent_skipped_processes_total",
                "Total number of GPU processes excluded from attribution, by reason",
                &["reason"]
            )
            .expect("Failed to register skipped_processes_total"),

            inventory_rebuilds: register_int_gauge!(
                "gpu_agent_inventory_rebuilds_total",
                "Total number of runtime inventory rebuilds"
            )
            .expect("Failed to register inventory_rebuilds_total"),

            inventory_rebuild_failures: register_int_gauge!(
                "gpu_agent_inventory_rebuild_failures_total",
                "Total number of failed runtime inventory rebuilds"
            )
            .expect("Failed to register inventory_rebuild_failures_total"),

            inventory_containers: register_int_gauge!(
                "gpu_agent_inventory_containers",
                "Number of containers in the current runtime inventory snapshot"
            )
            .expect("Failed to register inventory_containers"),

            sink_errors: register_int_counter_vec!(
                "gpu_agent_sink_errors_total",
                "Total number of failed emissions, by sink",
                &["sink"]
            )
            .expect("Failed to register sink_errors_total"),

            pod_gpu_memory_used_bytes: register_int_gauge_vec!(
                "gpu_agent_pod_gpu_memory_used_bytes",
                "GPU memory used by a workload on one device",
                USAGE_LABELS
            )
            .expect("Failed to register pod_gpu_memory_used_bytes"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
        self.inner().ticks.inc();
    }

    pub fn inc_tick_failures(&self) {
        self.inner().tick_failures.inc();
    }

    pub fn inc_dropped_ticks(&self, count: u64) {
        self.inner().dropped_ticks.inc_by(count);
    }

    pub fn inc_attributed(&self, count: u64) {
        self.inner().attributed_processes.inc_by(count);
    }

    pub fn inc_skipped(&self, reason: SkipReason) {
        self.inner()
            .skipped_processes
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Mirror the inventory cache's counters
    pub fn set_inventory(&self, rebuilds: u64, failures: u64, containers: usize) {
        self.inner().inventory_rebuilds.set(rebuilds as i64);
        self.inner().inventory_rebuild_failures.set(failures as i64);
        self.inner().inventory_containers.set(containers as i64);
    }

    pub fn inc_sink_errors(&self, sink: &str) {
        self.inner().sink_errors.with_label_values(&[sink]).inc();
    }

    /// Replace the per-workload GPU memory series with one tick's data
    pub fn publish_usage(&self, node: &str, data: &[GpuUsageDatum]) {
        let gauge = &self.inner().pod_gpu_memory_used_bytes;
        // Workloads that stopped using the GPU must disappear
        gauge.reset();
        for datum in data {
            let gpu_index = datum.gpu_index.to_string();
            gauge
                .with_label_values(&[
                    node,
                    &gpu_index,
                    &datum.gpu_uuid,
                    &datum.gpu_name,
                    &datum.namespace,
                    &datum.pod_name,
                    &datum.container_name,
                ])
                .set(datum.used_memory_bytes.min(i64::MAX as u64) as i64);
        }
    }

    pub fn skipped_count(&self, reason: SkipReason) -> u64 {
        self.inner()
            .skipped_processes
            .with_label_values(&[reason.as_str()])
            .get()
    }

    pub fn dropped_tick_count(&self) -> u64 {
        self.inner().dropped_ticks.get()
    }
}

/// Structured logger for agent events
///
/// Renders the core's structured results as consistent JSON log events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log a GPU process excluded from attribution
    pub fn log_skip(&self, raw: &RawGpuProcess, error: &AttributionError) {
        match error.reason() {
            SkipReason::NoContainerBoundary | SkipReason::ProcessExited => {
                debug!(
                    event = "process_skipped",
                    node = %self.node_name,
                    pid = raw.pid,
                    gpu_index = raw.gpu_index,
                    reason = %error.reason(),
                    error = %error,
                    "GPU process not attributed"
                );
            }
            _ => {
                warn!(
                    event = "process_skipped",
                    node = %self.node_name,
                    pid = raw.pid,
                    gpu_index = raw.gpu_index,
                    reason = %error.reason(),
                    error = %error,
                    "GPU process not attributed"
                );
            }
        }
    }

    /// Log a completed tick
    pub fn log_tick(&self, report: &TickReport) {
        info!(
            event = "tick_complete",
            node = %self.node_name,
            attributed = report.attributed,
            skipped = report.tally.total(),
            workloads = report.data.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            tally = %report.tally,
            "Sampling tick complete"
        );
    }

    /// Log a tick that produced no data
    pub fn log_tick_failure(&self, error: &dyn std::error::Error) {
        warn!(
            event = "tick_failed",
            node = %self.node_name,
            error = %error,
            "Sampling tick failed, no usage emitted"
        );
    }

    /// Log tick starts skipped after an overrun
    pub fn log_dropped_ticks(&self, dropped: u64, elapsed_ms: u64) {
        warn!(
            event = "ticks_dropped",
            node = %self.node_name,
            dropped = dropped,
            elapsed_ms = elapsed_ms,
            "Sampling tick overran the poll interval"
        );
    }

    /// Log a sink emission failure
    pub fn log_sink_error(&self, sink: &str, error: &anyhow::Error) {
        warn!(
            event = "sink_failed",
            node = %self.node_name,
            sink = %sink,
            error = %format!("{error:#}"),
            "Failed to emit GPU usage"
        );
    }

    /// Log one aggregated usage datum
    pub fn log_usage(&self, datum: &GpuUsageDatum) {
        info!(
            event = "gpu_usage",
            node = %self.node_name,
            gpu_index = datum.gpu_index,
            gpu_uuid = %datum.gpu_uuid,
            gpu_name = %datum.gpu_name,
            namespace = %datum.namespace,
            pod_name = %datum.pod_name,
            container_name = %datum.container_name,
            used_memory_bytes = datum.used_memory_bytes,
            "GPU usage"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, telemetry: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            telemetry = %telemetry,
            "GPU usage agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "GPU usage agent shutting down"
        );
    }
}

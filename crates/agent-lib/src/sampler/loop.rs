//! Sampling loop
//!
//! Drives one sampling tick per poll interval until shutdown.

use super::{SkipTally, TickError, TickReport};
use crate::aggregator::UsageAggregator;
use crate::config::AttributionConfig;
use crate::error::TelemetryError;
use crate::health::HealthRegistry;
use crate::models::{GpuUsageDatum, RawGpuProcess};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::resolver::AttributionResolver;
use crate::sink::UsageSink;
use crate::telemetry::GpuTelemetry;
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Tick starts skipped between two deadlines that actually ran.
///
/// With `MissedTickBehavior::Skip` the first start missed during an overrun
/// still fires late; consecutive deadlines that ran are therefore a whole
/// number of intervals apart and every interval past the first was skipped.
pub fn skipped_ticks(gap: Duration, poll_interval: Duration) -> u64 {
    let interval_ns = poll_interval.as_nanos();
    if interval_ns == 0 {
        return 0;
    }
    let intervals = (gap.as_nanos() + interval_ns / 2) / interval_ns;
    intervals.saturating_sub(1) as u64
}

/// Periodic sampling loop
pub struct SamplingLoop {
    telemetry: Arc<dyn GpuTelemetry>,
    resolver: Arc<AttributionResolver>,
    sinks: Vec<Arc<dyn UsageSink>>,
    config: AttributionConfig,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    dropped_ticks: AtomicU64,
}

impl SamplingLoop {
    pub fn new(
        telemetry: Arc<dyn GpuTelemetry>,
        resolver: Arc<AttributionResolver>,
        sinks: Vec<Arc<dyn UsageSink>>,
        config: AttributionConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            telemetry,
            resolver,
            sinks,
            config,
            metrics: AgentMetrics::new(),
            logger,
            health: None,
            dropped_ticks: AtomicU64::new(0),
        }
    }

    /// Report tick outcomes to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Tick starts dropped because a previous tick overran
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::SeqCst)
    }

    /// Run ticks until a shutdown signal arrives.
    /// Returns the number of tick starts dropped along the way.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(
            interval_secs = self.config.poll_interval.as_secs_f64(),
            workers = self.config.worker_concurrency,
            "Starting GPU sampling loop"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut previous: Option<Instant> = None;
        loop {
            tokio::select! {
                deadline = ticker.tick() => {
                    if let Some(previous) = previous {
                        self.record_gap(deadline.duration_since(previous));
                    }
                    previous = Some(deadline);
                    // Outcome is already logged, tallied and reported to health
                    let _ = self.run_tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down GPU sampling loop");
                    break;
                }
            }
        }
        self.dropped_ticks()
    }

    /// Count and report tick starts skipped between two deadlines that ran
    pub fn record_gap(&self, gap: Duration) -> u64 {
        let dropped = skipped_ticks(gap, self.config.poll_interval);
        if dropped > 0 {
            self.dropped_ticks.fetch_add(dropped, Ordering::SeqCst);
            self.metrics.inc_dropped_ticks(dropped);
            self.logger.log_dropped_ticks(dropped, gap.as_millis() as u64);
        }
        dropped
    }

    /// Run a single sampling tick
    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        let start = Instant::now();
        let timestamp = Utc::now();

        let raw = match self.sample().await {
            Ok(raw) => raw,
            Err(e) => {
                let error = TickError::from(e);
                self.metrics.inc_tick_failures();
                self.logger.log_tick_failure(&error);
                let outcome = Err(error);
                if let Some(health) = &self.health {
                    health.observe_tick(&outcome, 0).await;
                }
                return outcome;
            }
        };

        let inventory = self.resolver.inventory();
        inventory.begin_tick();

        let mut tally = SkipTally::default();
        let mut attributed = Vec::with_capacity(raw.len());
        for resolution in self.resolver.resolve_all(raw).await {
            match resolution.outcome {
                Ok(usage) => attributed.push(usage),
                Err(error) => {
                    let reason = error.reason();
                    tally.record(reason);
                    self.metrics.inc_skipped(reason);
                    self.logger.log_skip(&resolution.raw, &error);
                }
            }
        }
        self.metrics.inc_attributed(attributed.len() as u64);
        self.metrics.set_inventory(
            inventory.rebuild_count(),
            inventory.rebuild_failure_count(),
            inventory.len().await,
        );

        let data = UsageAggregator::aggregate(&attributed, timestamp.timestamp_millis());
        let sink_failures = self.emit(&data).await;

        let report = TickReport {
            timestamp,
            data,
            tally,
            attributed: attributed.len(),
            elapsed: start.elapsed(),
        };
        self.metrics
            .observe_tick_latency(report.elapsed.as_secs_f64());
        self.logger.log_tick(&report);

        let outcome = Ok(report);
        if let Some(health) = &self.health {
            health.observe_tick(&outcome, sink_failures).await;
        }
        outcome
    }

    async fn sample(&self) -> Result<Vec<RawGpuProcess>, TelemetryError> {
        let timeout = self.config.external_call_timeout;
        tokio::time::timeout(timeout, self.telemetry.sample())
            .await
            .map_err(|_| TelemetryError::Timeout(timeout))?
    }

    /// Hand data to every sink; returns the number of sinks that failed
    async fn emit(&self, data: &[GpuUsageDatum]) -> usize {
        let mut failures = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(data).await {
                failures += 1;
                self.metrics.inc_sink_errors(sink.name());
                self.logger.log_sink_error(sink.name(), &e);
            }
        }
        failures
    }
}

/// Builder for creating the sampling loop
pub struct SamplingLoopBuilder {
    telemetry: Option<Arc<dyn GpuTelemetry>>,
    resolver: Option<Arc<AttributionResolver>>,
    sinks: Vec<Arc<dyn UsageSink>>,
    config: AttributionConfig,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl SamplingLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            telemetry: None,
            resolver: None,
            sinks: Vec::new(),
            config: AttributionConfig::default(),
            logger: None,
            health: None,
        }
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn GpuTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn resolver(mut self, resolver: Arc<AttributionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(mut self, config: AttributionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the sampling loop
    pub fn build(self) -> Result<SamplingLoop> {
        self.config.validate()?;
        let telemetry = self
            .telemetry
            .ok_or_else(|| anyhow::anyhow!("GPU telemetry is required"))?;
        let resolver = self
            .resolver
            .ok_or_else(|| anyhow::anyhow!("Attribution resolver is required"))?;
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("unknown"));

        let sampling_loop = SamplingLoop::new(telemetry, resolver, self.sinks, self.config, logger);
        Ok(match self.health {
            Some(health) => sampling_loop.with_health(health),
            None => sampling_loop,
        })
    }
}

impl Default for SamplingLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! GPU usage agent - per-pod GPU memory attribution
//!
//! This binary runs as a DaemonSet on each GPU node, sampling the GPU driver
//! and attributing every process's GPU memory to its Kubernetes pod.

use anyhow::{Context, Result};
use gpu_agent_lib::{
    health::HealthRegistry,
    observability::{AgentMetrics, StructuredLogger},
    procfs::ProcfsInspector,
    resolver::AttributionResolver,
    runtime::{DockerCliRuntime, InventoryCache},
    sampler::SamplingLoopBuilder,
    sink::{InfluxSink, LogSink, PrometheusSink},
    telemetry::GpuTelemetry,
};
use gpu_usage_agent::{api, config::AgentConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Readiness is lost after this many poll intervals without a good tick
const STALE_TICK_INTERVALS: u32 = 3;

#[cfg(feature = "nvml")]
fn init_telemetry() -> Result<(Arc<dyn GpuTelemetry>, &'static str)> {
    let telemetry = gpu_agent_lib::telemetry::NvmlTelemetry::init()
        .context("Failed to initialise NVML")?;
    Ok((Arc::new(telemetry), "nvml"))
}

#[cfg(not(feature = "nvml"))]
fn init_telemetry() -> Result<(Arc<dyn GpuTelemetry>, &'static str)> {
    anyhow::bail!("Built without GPU telemetry support; enable the `nvml` feature")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting gpu-usage-agent");

    let config = AgentConfig::load()?;
    let attribution = config.attribution();
    attribution.validate()?;
    info!(node_name = %config.node_name, "Agent configured");

    let logger = StructuredLogger::new(&config.node_name);
    let metrics = AgentMetrics::new();

    let (telemetry, telemetry_name) = init_telemetry()?;
    logger.log_startup(AGENT_VERSION, telemetry_name);

    let inspector = Arc::new(ProcfsInspector::with_proc_root(&config.proc_root));
    let runtime = Arc::new(DockerCliRuntime::with_binary(&config.docker_binary));
    let inventory = Arc::new(InventoryCache::new(
        runtime,
        attribution.cache_ttl,
        attribution.rebuild_grace,
        attribution.external_call_timeout,
    ));
    let resolver = Arc::new(AttributionResolver::new(inspector, inventory, &attribution));

    let health_registry =
        HealthRegistry::for_agent(config.poll_interval() * STALE_TICK_INTERVALS).await;

    let mut builder = SamplingLoopBuilder::new()
        .telemetry(telemetry)
        .resolver(resolver)
        .config(attribution.clone())
        .logger(logger.clone())
        .health(health_registry.clone())
        .sink(Arc::new(PrometheusSink::new(
            metrics.clone(),
            &config.node_name,
        )));
    if let Some(influx) = &config.influx {
        info!(url = %influx.url, database = %influx.database, "InfluxDB sink enabled");
        builder = builder.sink(Arc::new(InfluxSink::new(
            influx,
            &config.node_name,
            attribution.external_call_timeout,
        )?));
    }
    if config.log_sink {
        builder = builder.sink(Arc::new(LogSink::new(logger.clone())));
    }
    let sampling_loop = builder.build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));
    let loop_handle = tokio::spawn(sampling_loop.run(shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    match loop_handle.await {
        Ok(dropped) => info!(dropped_ticks = dropped, "Sampling loop stopped"),
        Err(e) => error!(error = %e, "Sampling loop task failed"),
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

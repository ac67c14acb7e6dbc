use super::*;
use crate::config::AttributionConfig;
use crate::error::{ProcfsError, RuntimeError, SkipReason, TelemetryError};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{ContainerRecord, GpuUsageDatum, ProcessFacts, ProcessStatus, RawGpuProcess};
use crate::observability::StructuredLogger;
use crate::procfs::ProcessInspector;
use crate::resolver::AttributionResolver;
use crate::runtime::{ContainerRuntime, InventoryCache};
use crate::sink::UsageSink;
use crate::telemetry::GpuTelemetry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeTelemetry {
    processes: Vec<RawGpuProcess>,
    failing: AtomicBool,
    /// The first sample takes this long
    first_delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl GpuTelemetry for FakeTelemetry {
    async fn sample(&self) -> Result<Vec<RawGpuProcess>, TelemetryError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 && !self.first_delay.is_zero() {
            tokio::time::sleep(self.first_delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TelemetryError::Enumeration("driver not loaded".to_string()));
        }
        Ok(self.processes.clone())
    }
}

struct FakeProcesses(HashMap<i32, (i32, &'static str)>);

#[async_trait]
impl ProcessInspector for FakeProcesses {
    async fn facts(&self, pid: i32) -> Result<ProcessFacts, ProcfsError> {
        self.0
            .get(&pid)
            .map(|(_, name)| ProcessFacts {
                pid,
                username: "mluser".to_string(),
                command: name.to_string(),
            })
            .ok_or(ProcfsError::NoSuchProcess(pid))
    }

    async fn status(&self, pid: i32) -> Result<ProcessStatus, ProcfsError> {
        self.0
            .get(&pid)
            .map(|(ppid, name)| ProcessStatus {
                pid,
                ppid: *ppid,
                name: name.to_string(),
            })
            .ok_or(ProcfsError::NoSuchProcess(pid))
    }
}

struct CountingRuntime {
    containers: Vec<ContainerRecord>,
    inspections: AtomicUsize,
}

#[async_trait]
impl ContainerRuntime for CountingRuntime {
    async fn list_container_ids(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.containers.iter().map(|c| c.container_id.clone()).collect())
    }

    async fn inspect(&self, ids: &[String]) -> Result<Vec<ContainerRecord>, RuntimeError> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .containers
            .iter()
            .filter(|c| ids.contains(&c.container_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<GpuUsageDatum>>>,
}

#[async_trait]
impl UsageSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn emit(&self, data: &[GpuUsageDatum]) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl UsageSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn emit(&self, _data: &[GpuUsageDatum]) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

fn raw(gpu_index: u32, pid: i32, used_memory_bytes: u64) -> RawGpuProcess {
    RawGpuProcess {
        gpu_index,
        gpu_uuid: format!("GPU-{gpu_index}"),
        gpu_name: "Tesla V100".to_string(),
        pid,
        used_memory_bytes,
    }
}

fn container(boundary_pid: i32, raw_name: &str) -> ContainerRecord {
    ContainerRecord {
        boundary_pid,
        raw_name: raw_name.to_string(),
        container_id: format!("c{boundary_pid}"),
    }
}

struct Harness {
    telemetry: Arc<FakeTelemetry>,
    runtime: Arc<CountingRuntime>,
    sink: Arc<RecordingSink>,
    sampling_loop: SamplingLoop,
}

fn harness(processes: Vec<RawGpuProcess>, extra_sink: Option<Arc<dyn UsageSink>>) -> Harness {
    timed_harness(processes, extra_sink, Duration::from_secs(10), Duration::ZERO)
}

fn timed_harness(
    processes: Vec<RawGpuProcess>,
    extra_sink: Option<Arc<dyn UsageSink>>,
    poll_interval: Duration,
    first_delay: Duration,
) -> Harness {
    let inspector = Arc::new(FakeProcesses(HashMap::from([
        (1, (0, "systemd")),
        (20, (1, "containerd-shim")),
        (50, (20, "bash")),
        (100, (50, "python3")),
        (101, (50, "python3")),
        (21, (1, "containerd-shim")),
        (60, (21, "bash")),
        (130, (60, "torchrun")),
        (300, (1, "Xorg")),
    ])));
    let runtime = Arc::new(CountingRuntime {
        containers: vec![
            container(50, "k8s_infer_bert-7f_ml_9a1"),
            container(60, "k8s_train_gpt-2c_research_b22_0"),
        ],
        inspections: AtomicUsize::new(0),
    });
    let telemetry = Arc::new(FakeTelemetry {
        processes,
        failing: AtomicBool::new(false),
        first_delay,
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(RecordingSink::default());

    let config = AttributionConfig::default()
        .poll_interval(poll_interval)
        .external_call_timeout(Duration::from_secs(1));
    let inventory = Arc::new(InventoryCache::new(
        runtime.clone(),
        config.cache_ttl,
        config.rebuild_grace,
        config.external_call_timeout,
    ));
    let resolver = Arc::new(AttributionResolver::new(inspector, inventory, &config));

    let mut builder = SamplingLoopBuilder::new()
        .telemetry(telemetry.clone())
        .resolver(resolver)
        .sink(sink.clone())
        .config(config)
        .logger(StructuredLogger::new("gpu-node-1"));
    if let Some(extra) = extra_sink {
        builder = builder.sink(extra);
    }

    Harness {
        telemetry,
        runtime,
        sink,
        sampling_loop: builder.build().unwrap(),
    }
}

#[tokio::test]
async fn test_tick_attributes_containerized_process() {
    let h = harness(vec![raw(0, 100, 2_097_152)], None);

    let report = h.sampling_loop.run_tick().await.unwrap();

    assert_eq!(report.data.len(), 1);
    let datum = &report.data[0];
    assert_eq!(datum.pod_name, "bert-7f");
    assert_eq!(datum.namespace, "ml");
    assert_eq!(datum.container_name, "infer");
    assert_eq!(datum.used_memory_bytes, 2_097_152);
    assert_eq!(datum.sample_timestamp, report.timestamp.timestamp_millis());
    assert_eq!(report.attributed, 1);
    assert!(report.tally.is_empty());

    let batches = h.sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], report.data);
}

#[tokio::test]
async fn test_exited_process_is_skipped_alone() {
    let h = harness(
        vec![raw(0, 100, 1_000), raw(0, 999, 5_000), raw(1, 130, 7_000)],
        None,
    );

    let report = h.sampling_loop.run_tick().await.unwrap();

    assert_eq!(report.tally.count(SkipReason::ProcessExited), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.attributed, 2);
    let pods: Vec<&str> = report.data.iter().map(|d| d.pod_name.as_str()).collect();
    assert_eq!(pods, vec!["bert-7f", "gpt-2c"]);
}

#[tokio::test]
async fn test_processes_of_one_container_are_summed() {
    let h = harness(
        vec![raw(0, 100, 1_000), raw(0, 101, 3_000), raw(1, 100, 500)],
        None,
    );

    let report = h.sampling_loop.run_tick().await.unwrap();

    assert_eq!(report.data.len(), 2);
    assert_eq!(report.data[0].gpu_index, 0);
    assert_eq!(report.data[0].used_memory_bytes, 4_000);
    assert_eq!(report.data[1].gpu_index, 1);
    assert_eq!(report.data[1].used_memory_bytes, 500);
}

#[tokio::test]
async fn test_one_inventory_scan_per_tick() {
    let processes = (0..8)
        .map(|i| raw(i % 2, if i % 2 == 0 { 100 } else { 130 }, 1_000))
        .chain([raw(0, 300, 10)])
        .collect();
    let h = harness(processes, None);

    let report = h.sampling_loop.run_tick().await.unwrap();

    assert_eq!(report.attributed, 8);
    assert_eq!(report.tally.count(SkipReason::NoContainerBoundary), 1);
    assert_eq!(h.runtime.inspections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_telemetry_failure_fails_tick() {
    let h = harness(vec![raw(0, 100, 1_000)], None);
    h.telemetry.failing.store(true, Ordering::SeqCst);

    let result = h.sampling_loop.run_tick().await;

    assert!(matches!(result, Err(TickError::Telemetry(_))));
    assert!(h.sink.batches.lock().unwrap().is_empty());
    assert_eq!(h.runtime.inspections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_tick() {
    let h = harness(vec![raw(0, 100, 1_000)], Some(Arc::new(FailingSink)));

    let report = h.sampling_loop.run_tick().await.unwrap();

    assert_eq!(report.data.len(), 1);
    assert_eq!(h.sink.batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_sample_still_reaches_sinks() {
    let h = harness(Vec::new(), None);

    let report = h.sampling_loop.run_tick().await.unwrap();

    assert!(report.data.is_empty());
    assert_eq!(h.sink.batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tick_outcomes_drive_health() {
    let Harness {
        telemetry,
        sampling_loop,
        ..
    } = harness(vec![raw(0, 100, 1_000)], Some(Arc::new(FailingSink)));
    let health = HealthRegistry::for_agent(Duration::from_secs(30)).await;
    let sampling_loop = sampling_loop.with_health(health.clone());

    assert!(!health.readiness().await.ready);

    sampling_loop.run_tick().await.unwrap();
    let status = health.health().await;
    assert_eq!(status.components[components::TELEMETRY].status, ComponentStatus::Healthy);
    assert_eq!(status.components[components::SINK].status, ComponentStatus::Degraded);
    assert!(health.readiness().await.ready);

    telemetry.failing.store(true, Ordering::SeqCst);
    assert!(sampling_loop.run_tick().await.is_err());
    let status = health.health().await;
    assert_eq!(status.components[components::TELEMETRY].status, ComponentStatus::Unhealthy);
    assert!(!health.readiness().await.ready);
}

#[tokio::test]
async fn test_record_gap_counts_dropped_ticks() {
    let h = harness(Vec::new(), None);

    assert_eq!(h.sampling_loop.record_gap(Duration::from_secs(10)), 0);
    assert_eq!(h.sampling_loop.record_gap(Duration::from_secs(30)), 2);
    assert_eq!(h.sampling_loop.record_gap(Duration::from_secs(20)), 1);
    assert_eq!(h.sampling_loop.dropped_ticks(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_overrunning_tick_drops_only_skipped_starts() {
    // Starts are scheduled at 0, 100, 200 and 300ms. The first tick runs
    // until 250ms, the 100ms start runs late and only 200ms is skipped.
    let h = timed_harness(
        Vec::new(),
        None,
        Duration::from_millis(100),
        Duration::from_millis(250),
    );
    let telemetry = h.telemetry.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let handle = tokio::spawn(h.sampling_loop.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(350)).await;
    shutdown_tx.send(()).unwrap();
    let dropped = handle.await.unwrap();

    let ticks_run = telemetry.calls.load(Ordering::SeqCst) as u64;
    assert_eq!(ticks_run, 3);
    assert_eq!(dropped, 1);
    assert_eq!(ticks_run + dropped, 4);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = harness(vec![raw(0, 100, 1_000)], None);
    let sink = h.sink.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let handle = tokio::spawn(h.sampling_loop.run(shutdown_rx));
    // The first interval tick fires immediately
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(()).unwrap();

    let dropped = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dropped, 0);
    assert_eq!(sink.batches.lock().unwrap().len(), 1);
}

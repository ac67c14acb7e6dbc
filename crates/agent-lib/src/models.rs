//! Core data models for GPU usage attribution

use serde::{Deserialize, Serialize};

/// A GPU device as enumerated by the telemetry collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub uuid: String,
    pub name: String,
}

/// One process listed by the GPU driver during a sampling tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGpuProcess {
    pub gpu_index: u32,
    pub gpu_uuid: String,
    pub gpu_name: String,
    pub pid: i32,
    pub used_memory_bytes: u64,
}

impl RawGpuProcess {
    pub fn new(device: &GpuDevice, pid: i32, used_memory_bytes: u64) -> Self {
        Self {
            gpu_index: device.index,
            gpu_uuid: device.uuid.clone(),
            gpu_name: device.name.clone(),
            pid,
            used_memory_bytes,
        }
    }
}

/// Snapshot of OS-level facts about a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFacts {
    pub pid: i32,
    pub username: String,
    /// Short command name, `"?"` when unavailable
    pub command: String,
}

/// Process table entry used for the ancestry walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub pid: i32,
    /// Parent pid, 0 when the process has no parent
    pub ppid: i32,
    /// Process name used for supervisor matching
    pub name: String,
}

/// Container as reported by the runtime inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub boundary_pid: i32,
    pub raw_name: String,
    pub container_id: String,
}

/// The (namespace, pod, container) triple GPU usage is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    pub pod_name: String,
    pub namespace: String,
    pub container_name: String,
}

/// A raw GPU process successfully resolved to its workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedUsage {
    pub gpu_index: u32,
    pub gpu_uuid: String,
    pub gpu_name: String,
    pub workload: WorkloadIdentity,
    pub username: String,
    pub used_memory_bytes: u64,
    pub pid: i32,
}

/// Aggregated GPU memory usage of one workload on one device for a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuUsageDatum {
    pub gpu_index: u32,
    pub gpu_uuid: String,
    pub gpu_name: String,
    pub pod_name: String,
    pub namespace: String,
    pub container_name: String,
    pub used_memory_bytes: u64,
    /// Unix timestamp in milliseconds
    pub sample_timestamp: i64,
}

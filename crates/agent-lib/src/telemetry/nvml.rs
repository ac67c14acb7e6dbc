//! NVML-backed GPU telemetry

use super::{merge_listings, GpuTelemetry};
use crate::error::TelemetryError;
use crate::models::{GpuDevice, RawGpuProcess};
use async_trait::async_trait;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::struct_wrappers::device::ProcessInfo;
use nvml_wrapper::Nvml;
use std::sync::Arc;
use tracing::{debug, info};

/// NixOS keeps the driver library outside the default search path
const NIXOS_NVML_PATH: &str = "/run/opengl-driver/lib/libnvidia-ml.so";

/// GPU telemetry read through the NVIDIA management library
pub struct NvmlTelemetry {
    nvml: Arc<Nvml>,
}

impl NvmlTelemetry {
    /// Initialise NVML, trying the default library path first
    pub fn init() -> Result<Self, TelemetryError> {
        let nvml = Nvml::init()
            .or_else(|_| {
                Nvml::builder()
                    .lib_path(std::ffi::OsStr::new(NIXOS_NVML_PATH))
                    .init()
            })
            .map_err(|e| TelemetryError::Init(e.to_string()))?;

        let count = nvml
            .device_count()
            .map_err(|e| TelemetryError::Enumeration(e.to_string()))?;
        info!(devices = count, "NVML initialized");

        Ok(Self {
            nvml: Arc::new(nvml),
        })
    }

    fn to_listing(processes: Vec<ProcessInfo>) -> Vec<(i32, u64)> {
        processes
            .into_iter()
            .filter_map(|p| {
                let pid = i32::try_from(p.pid).ok()?;
                let used = match p.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => bytes,
                    UsedGpuMemory::Unavailable => 0,
                };
                Some((pid, used))
            })
            .collect()
    }

    fn sample_blocking(nvml: &Nvml) -> Result<Vec<RawGpuProcess>, TelemetryError> {
        let count = nvml
            .device_count()
            .map_err(|e| TelemetryError::Enumeration(e.to_string()))?;

        let mut processes = Vec::new();
        for index in 0..count {
            let handle = nvml
                .device_by_index(index)
                .map_err(|e| TelemetryError::Enumeration(format!("device {index}: {e}")))?;
            let device = GpuDevice {
                index,
                name: handle
                    .name()
                    .map_err(|e| TelemetryError::Enumeration(format!("device {index} name: {e}")))?,
                uuid: handle
                    .uuid()
                    .map_err(|e| TelemetryError::Enumeration(format!("device {index} uuid: {e}")))?,
            };

            // Either listing may be unsupported on a given device
            let compute = match handle.running_compute_processes() {
                Ok(list) => Some(Self::to_listing(list)),
                Err(e) => {
                    debug!(gpu_index = index, error = %e, "Compute process listing unsupported");
                    None
                }
            };
            let graphics = match handle.running_graphics_processes() {
                Ok(list) => Some(Self::to_listing(list)),
                Err(e) => {
                    debug!(gpu_index = index, error = %e, "Graphics process listing unsupported");
                    None
                }
            };

            processes.extend(merge_listings(&device, compute, graphics));
        }

        Ok(processes)
    }
}

#[async_trait]
impl GpuTelemetry for NvmlTelemetry {
    async fn sample(&self) -> Result<Vec<RawGpuProcess>, TelemetryError> {
        let nvml = self.nvml.clone();
        tokio::task::spawn_blocking(move || Self::sample_blocking(&nvml))
            .await
            .map_err(|e| TelemetryError::Worker(e.to_string()))?
    }
}

//! GPU telemetry
//!
//! Lists the processes holding GPU memory on every device of the machine.

#[cfg(feature = "nvml")]
mod nvml;

#[cfg(feature = "nvml")]
pub use nvml::NvmlTelemetry;

use crate::error::TelemetryError;
use crate::models::{GpuDevice, RawGpuProcess};
use std::collections::HashMap;

pub use async_trait::async_trait;

/// Trait for GPU driver telemetry sources
#[async_trait]
pub trait GpuTelemetry: Send + Sync {
    /// One listing of GPU processes across all devices.
    /// Failing to enumerate devices fails the whole sample.
    async fn sample(&self) -> Result<Vec<RawGpuProcess>, TelemetryError>;
}

/// Merge a device's compute and graphics process listings.
///
/// `None` means the listing is unsupported on this device and contributes
/// nothing. A pid present in both listings is reported once with the larger
/// memory figure. Order of first appearance is kept.
pub fn merge_listings(
    device: &GpuDevice,
    compute: Option<Vec<(i32, u64)>>,
    graphics: Option<Vec<(i32, u64)>>,
) -> Vec<RawGpuProcess> {
    let mut order: Vec<i32> = Vec::new();
    let mut memory: HashMap<i32, u64> = HashMap::new();

    for (pid, used) in compute
        .into_iter()
        .flatten()
        .chain(graphics.into_iter().flatten())
    {
        memory
            .entry(pid)
            .and_modify(|m| *m = (*m).max(used))
            .or_insert_with(|| {
                order.push(pid);
                used
            });
    }

    order
        .into_iter()
        .map(|pid| RawGpuProcess::new(device, pid, memory[&pid]))
        .collect()
}

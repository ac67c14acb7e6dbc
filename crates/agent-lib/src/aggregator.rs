//! Per-device aggregation of attributed usage

use crate::models::{AttributedUsage, GpuUsageDatum};
use std::collections::HashMap;

/// Groups attributed records into one datum per (GPU, namespace, pod, container)
pub struct UsageAggregator;

impl UsageAggregator {
    /// Sum memory per group. Output follows first-seen group order.
    pub fn aggregate(attributed: &[AttributedUsage], sample_timestamp: i64) -> Vec<GpuUsageDatum> {
        let mut groups: HashMap<(u32, &str, &str, &str), usize> = HashMap::new();
        let mut data: Vec<GpuUsageDatum> = Vec::new();

        for usage in attributed {
            let key = (
                usage.gpu_index,
                usage.workload.pod_name.as_str(),
                usage.workload.container_name.as_str(),
                usage.workload.namespace.as_str(),
            );

            match groups.get(&key) {
                Some(&idx) => {
                    let datum = &mut data[idx];
                    datum.used_memory_bytes =
                        datum.used_memory_bytes.saturating_add(usage.used_memory_bytes);
                }
                None => {
                    groups.insert(key, data.len());
                    data.push(GpuUsageDatum {
                        gpu_index: usage.gpu_index,
                        gpu_uuid: usage.gpu_uuid.clone(),
                        gpu_name: usage.gpu_name.clone(),
                        pod_name: usage.workload.pod_name.clone(),
                        namespace: usage.workload.namespace.clone(),
                        container_name: usage.workload.container_name.clone(),
                        used_memory_bytes: usage.used_memory_bytes,
                        sample_timestamp,
                    });
                }
            }
        }

        data
    }
}

//! Attribution of raw GPU processes to workloads
//!
//! For each raw GPU process: look up the process, climb to its container
//! boundary, find the owning container in the runtime inventory and parse
//! the workload identity from the container name. The first failing step
//! decides the skip reason; a skip never affects other processes.

use crate::config::AttributionConfig;
use crate::error::AttributionError;
use crate::identity;
use crate::models::{AttributedUsage, RawGpuProcess};
use crate::procfs::{AncestryWalker, ProcessInspector};
use crate::runtime::InventoryCache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Outcome of resolving one raw GPU process
#[derive(Debug, Clone)]
pub struct Resolution {
    pub raw: RawGpuProcess,
    pub outcome: Result<AttributedUsage, AttributionError>,
}

/// Resolves raw GPU processes to attributed usage records
pub struct AttributionResolver {
    inspector: Arc<dyn ProcessInspector>,
    walker: AncestryWalker,
    inventory: Arc<InventoryCache>,
    timeout: Duration,
    concurrency: usize,
}

impl AttributionResolver {
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        inventory: Arc<InventoryCache>,
        config: &AttributionConfig,
    ) -> Self {
        let walker = AncestryWalker::new(
            inspector.clone(),
            config.supervisor_names.iter().cloned(),
            config.max_ancestry_depth,
        );

        Self {
            inspector,
            walker,
            inventory,
            timeout: config.external_call_timeout,
            concurrency: config.worker_concurrency.max(1),
        }
    }

    pub fn inventory(&self) -> &Arc<InventoryCache> {
        &self.inventory
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, AttributionError>
    where
        F: Future<Output = Result<T, AttributionError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AttributionError::ExternalCallTimeout {
                operation,
                timeout: self.timeout,
            })?
    }

    /// Resolve one raw GPU process
    pub async fn resolve(&self, raw: &RawGpuProcess) -> Result<AttributedUsage, AttributionError> {
        let pid = raw.pid;

        let facts = self
            .bounded("process lookup", async {
                self.inspector
                    .facts(pid)
                    .await
                    .map_err(|e| e.into_attribution("process lookup"))
            })
            .await?;

        let boundary_pid = self
            .bounded("ancestry walk", async {
                self.walker
                    .find_boundary(pid)
                    .await
                    .map_err(|e| e.into_attribution("ancestry walk"))
            })
            .await?
            .ok_or(AttributionError::ContainerBoundaryNotFound { pid })?;

        let container = self.inventory.resolve(boundary_pid).await?;
        let workload = identity::parse(&container.raw_name)?;

        Ok(AttributedUsage {
            gpu_index: raw.gpu_index,
            gpu_uuid: raw.gpu_uuid.clone(),
            gpu_name: raw.gpu_name.clone(),
            workload,
            username: facts.username,
            used_memory_bytes: raw.used_memory_bytes,
            pid,
        })
    }

    /// Resolve a tick's raw processes concurrently.
    /// Results are returned in input order.
    pub async fn resolve_all(self: &Arc<Self>, raw: Vec<RawGpuProcess>) -> Vec<Resolution> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(raw.len());

        for process in raw {
            let resolver = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let task_input = process.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                resolver.resolve(&task_input).await
            });
            handles.push((process, handle));
        }

        let mut resolutions = Vec::with_capacity(handles.len());
        for (raw, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(AttributionError::ExternalCallFailure {
                    operation: "resolution worker",
                    message: e.to_string(),
                }),
            };
            resolutions.push(Resolution { raw, outcome });
        }
        resolutions
    }
}

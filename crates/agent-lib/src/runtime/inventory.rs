//! Cached runtime inventory
//!
//! Holds a snapshot of boundary pid -> container, rebuilt wholesale from the
//! runtime. Rebuilds are serialized: concurrent lookups that miss wait for
//! the rebuild in flight instead of starting their own.

use super::ContainerRuntime;
use crate::error::AttributionError;
use crate::models::ContainerRecord;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const REBUILD_OPERATION: &str = "inventory rebuild";

/// One consistent view of the runtime inventory
#[derive(Debug)]
struct Snapshot {
    index: HashMap<i32, ContainerRecord>,
    built_at: Instant,
    /// Tick during which the snapshot was built
    epoch: u64,
    /// Monotonic rebuild counter
    generation: u64,
}

impl Snapshot {
    fn is_fresh(&self, ttl: Duration, epoch: u64) -> bool {
        self.epoch == epoch || self.built_at.elapsed() < ttl
    }
}

/// Bookkeeping owned by whoever holds the rebuild lock
#[derive(Debug, Default)]
struct RebuildState {
    /// Tick in which the last rebuild attempt failed
    failed_epoch: Option<u64>,
    last_error: Option<AttributionError>,
}

/// Runtime inventory cache with TTL expiry and rebuild-on-miss
pub struct InventoryCache {
    runtime: Arc<dyn ContainerRuntime>,
    ttl: Duration,
    grace: Duration,
    timeout: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    rebuild_lock: Mutex<RebuildState>,
    epoch: AtomicU64,
    generation: AtomicU64,
    rebuild_failures: AtomicU64,
}

impl InventoryCache {
    /// Create a cache.
    ///
    /// `ttl` bounds snapshot age, `grace` is how much longer a snapshot may be
    /// served when rebuilding fails, `timeout` bounds one rebuild.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ttl: Duration,
        grace: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            ttl,
            grace,
            timeout,
            snapshot: RwLock::new(None),
            rebuild_lock: Mutex::new(RebuildState::default()),
            epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            rebuild_failures: AtomicU64::new(0),
        }
    }

    /// Mark the start of a sampling tick.
    ///
    /// A snapshot built during the current tick is served for the rest of
    /// it, and a miss against it is final. Misses against older snapshots
    /// force one rebuild per tick.
    pub fn begin_tick(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of successful rebuilds so far
    pub fn rebuild_count(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of failed rebuild attempts so far
    pub fn rebuild_failure_count(&self) -> u64 {
        self.rebuild_failures.load(Ordering::SeqCst)
    }

    /// Number of containers in the current snapshot
    pub async fn len(&self) -> usize {
        self.current().await.map(|s| s.index.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolve a boundary process to its container
    pub async fn resolve(&self, boundary_pid: i32) -> Result<ContainerRecord, AttributionError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let observed = self.current().await;

        if let Some(snapshot) = &observed {
            if snapshot.is_fresh(self.ttl, epoch) {
                if let Some(record) = snapshot.index.get(&boundary_pid) {
                    return Ok(record.clone());
                }
                if snapshot.epoch == epoch {
                    return Err(AttributionError::ContainerNotInInventory { boundary_pid });
                }
                debug!(boundary_pid, "Inventory miss, snapshot may be stale");
            }
        }

        let observed_generation = observed.map(|s| s.generation).unwrap_or(0);
        let snapshot = self.refresh(observed_generation, epoch).await?;

        snapshot
            .index
            .get(&boundary_pid)
            .cloned()
            .ok_or(AttributionError::ContainerNotInInventory { boundary_pid })
    }

    async fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Rebuild under the single-writer lock, unless another caller already
    /// rebuilt since `observed_generation` or a rebuild already failed this tick
    async fn refresh(
        &self,
        observed_generation: u64,
        epoch: u64,
    ) -> Result<Arc<Snapshot>, AttributionError> {
        let mut state = self.rebuild_lock.lock().await;

        if let Some(snapshot) = self.current().await {
            if snapshot.generation > observed_generation {
                return Ok(snapshot);
            }
        }

        if state.failed_epoch == Some(epoch) {
            let error = state.last_error.clone().unwrap_or(AttributionError::ExternalCallFailure {
                operation: REBUILD_OPERATION,
                message: "previous rebuild failed".into(),
            });
            return self.fallback(error).await;
        }

        match self.rebuild(epoch).await {
            Ok(snapshot) => {
                state.failed_epoch = None;
                state.last_error = None;
                *self.snapshot.write().await = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(error) => {
                self.rebuild_failures.fetch_add(1, Ordering::SeqCst);
                warn!(error = %error, "Runtime inventory rebuild failed");
                state.failed_epoch = Some(epoch);
                state.last_error = Some(error.clone());
                self.fallback(error).await
            }
        }
    }

    /// Serve the last good snapshot while it is within the grace period
    async fn fallback(&self, error: AttributionError) -> Result<Arc<Snapshot>, AttributionError> {
        match self.current().await {
            Some(snapshot) if snapshot.built_at.elapsed() <= self.ttl + self.grace => {
                debug!(
                    age_ms = snapshot.built_at.elapsed().as_millis() as u64,
                    "Serving stale runtime inventory"
                );
                Ok(snapshot)
            }
            _ => Err(error),
        }
    }

    async fn rebuild(&self, epoch: u64) -> Result<Arc<Snapshot>, AttributionError> {
        let start = Instant::now();

        let records = tokio::time::timeout(self.timeout, async {
            let ids = self.runtime.list_container_ids().await?;
            self.runtime.inspect(&ids).await
        })
        .await
        .map_err(|_| AttributionError::ExternalCallTimeout {
            operation: REBUILD_OPERATION,
            timeout: self.timeout,
        })?
        .map_err(|e| e.into_attribution(REBUILD_OPERATION))?;

        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            // The first record for a pid wins
            match index.entry(record.boundary_pid) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(existing) => {
                    debug!(
                        boundary_pid = record.boundary_pid,
                        kept = %existing.get().container_id,
                        ignored = %record.container_id,
                        "Duplicate boundary pid in inventory"
                    );
                }
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            containers = index.len(),
            generation,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rebuilt runtime inventory"
        );

        Ok(Arc::new(Snapshot {
            index,
            built_at: Instant::now(),
            epoch,
            generation,
        }))
    }
}

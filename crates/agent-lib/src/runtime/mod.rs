//! Container runtime inventory
//!
//! Maps container boundary processes to the containers that own them.
//! The runtime is queried through [`ContainerRuntime`]; lookups go through
//! [`InventoryCache`] so a sampling tick pays for at most one full
//! inventory scan.

mod docker;
mod inventory;

pub use docker::DockerCliRuntime;
pub use inventory::InventoryCache;

use crate::error::RuntimeError;
use crate::models::ContainerRecord;

pub use async_trait::async_trait;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of all running containers
    async fn list_container_ids(&self) -> Result<Vec<String>, RuntimeError>;

    /// Boundary pid, name and id of each container in `ids`.
    /// Containers that vanished since listing are omitted.
    async fn inspect(&self, ids: &[String]) -> Result<Vec<ContainerRecord>, RuntimeError>;
}

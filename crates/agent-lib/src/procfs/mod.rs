//! OS process introspection
//!
//! Provides the process lookups attribution depends on: per-process facts
//! (user, command) and the parent links used to climb from a GPU process to
//! the boundary process of its container.

mod ancestry;
mod linux;


pub use ancestry::AncestryWalker;
pub use linux::ProcfsInspector;

use crate::error::ProcfsError;
use crate::models::{ProcessFacts, ProcessStatus};

pub use async_trait::async_trait;

/// Trait for OS process table access
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// User and command of a live process
    async fn facts(&self, pid: i32) -> Result<ProcessFacts, ProcfsError>;

    /// Parent link and name of a live process
    async fn status(&self, pid: i32) -> Result<ProcessStatus, ProcfsError>;
}

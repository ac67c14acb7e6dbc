//! Container boundary lookup over the process tree

use super::ProcessInspector;
use crate::error::ProcfsError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Climbs parent links until it reaches the process started by a
/// container runtime's per-container supervisor
pub struct AncestryWalker {
    inspector: Arc<dyn ProcessInspector>,
    supervisor_names: HashSet<String>,
    max_depth: usize,
}

impl AncestryWalker {
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        supervisor_names: impl IntoIterator<Item = String>,
        max_depth: usize,
    ) -> Self {
        Self {
            inspector,
            supervisor_names: supervisor_names.into_iter().collect(),
            max_depth,
        }
    }

    fn is_supervisor(&self, name: &str) -> bool {
        self.supervisor_names.contains(name)
    }

    /// Find the boundary process above `pid`.
    ///
    /// Returns `Ok(None)` when the walk reaches the root of the tree, a
    /// process without a parent, a parent cycle, or a process that exited
    /// mid-walk. Other procfs failures are returned as errors.
    pub async fn find_boundary(&self, pid: i32) -> Result<Option<i32>, ProcfsError> {
        let mut current = match self.inspector.status(pid).await {
            Ok(status) => status,
            Err(ProcfsError::NoSuchProcess(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut visited = HashSet::from([current.pid]);

        for step in 0..self.max_depth {
            if current.pid <= 1 || current.ppid <= 0 {
                debug!(pid, step, "Reached process tree root without a supervisor");
                return Ok(None);
            }

            let parent = match self.inspector.status(current.ppid).await {
                Ok(parent) => parent,
                Err(ProcfsError::NoSuchProcess(gone)) => {
                    debug!(pid, gone, "Ancestor exited during walk");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            if self.is_supervisor(&parent.name) {
                return Ok(Some(current.pid));
            }

            if !visited.insert(parent.pid) {
                debug!(pid, cycle_at = parent.pid, "Parent link cycle in process tree");
                return Ok(None);
            }

            current = parent;
        }

        debug!(pid, max_depth = self.max_depth, "Ancestry walk exceeded depth limit");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessFacts, ProcessStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory process table: pid -> (ppid, name)
    struct FakeProcessTable {
        processes: HashMap<i32, (i32, &'static str)>,
        lookups: AtomicUsize,
    }

    impl FakeProcessTable {
        fn new(entries: &[(i32, i32, &'static str)]) -> Self {
            Self {
                processes: entries
                    .iter()
                    .map(|(pid, ppid, name)| (*pid, (*ppid, *name)))
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProcessInspector for FakeProcessTable {
        async fn facts(&self, pid: i32) -> Result<ProcessFacts, ProcfsError> {
            Err(ProcfsError::NoSuchProcess(pid))
        }

        async fn status(&self, pid: i32) -> Result<ProcessStatus, ProcfsError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.processes
                .get(&pid)
                .map(|(ppid, name)| ProcessStatus {
                    pid,
                    ppid: *ppid,
                    name: name.to_string(),
                })
                .ok_or(ProcfsError::NoSuchProcess(pid))
        }
    }

    fn walker(table: Arc<FakeProcessTable>) -> AncestryWalker {
        AncestryWalker::new(
            table,
            vec!["docker-containerd-shim".to_string()],
            1024,
        )
    }

    #[tokio::test]
    async fn test_finds_boundary_below_supervisor() {
        let table = Arc::new(FakeProcessTable::new(&[
            (1, 0, "systemd"),
            (10, 1, "dockerd"),
            (20, 10, "docker-containerd-shim"),
            (50, 20, "bash"),
            (100, 50, "python3"),
        ]));

        assert_eq!(walker(table).find_boundary(100).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_process_directly_under_supervisor_is_its_own_boundary() {
        let table = Arc::new(FakeProcessTable::new(&[
            (1, 0, "systemd"),
            (20, 1, "docker-containerd-shim"),
            (50, 20, "python3"),
        ]));

        assert_eq!(walker(table).find_boundary(50).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_host_process_reaches_root() {
        let table = Arc::new(FakeProcessTable::new(&[
            (1, 0, "systemd"),
            (300, 1, "Xorg"),
        ]));

        assert_eq!(walker(table).find_boundary(300).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let table = Arc::new(FakeProcessTable::new(&[
            (100, 200, "a"),
            (200, 300, "b"),
            (300, 100, "c"),
        ]));

        assert_eq!(walker(table.clone()).find_boundary(100).await.unwrap(), None);
        // One lookup per distinct process plus the repeat that closes the cycle
        assert_eq!(table.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_found() {
        let table = Arc::new(FakeProcessTable::new(&[(100, 99, "python3")]));

        assert_eq!(walker(table).find_boundary(100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_exited_process_is_not_found() {
        let table = Arc::new(FakeProcessTable::new(&[]));

        assert_eq!(walker(table).find_boundary(100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_walk_is_bounded_by_tree_depth() {
        // Chain 1 <- 2 <- ... <- 50 with no supervisor anywhere
        let entries: Vec<(i32, i32, &'static str)> =
            (1..=50).map(|pid| (pid, pid - 1, "worker")).collect();
        let table = Arc::new(FakeProcessTable::new(&entries));

        assert_eq!(walker(table.clone()).find_boundary(50).await.unwrap(), None);
        assert!(table.lookups.load(Ordering::SeqCst) <= 50);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let entries: Vec<(i32, i32, &'static str)> =
            (1..=50).map(|pid| (pid, pid - 1, "worker")).collect();
        let table = Arc::new(FakeProcessTable::new(&entries));
        let walker = AncestryWalker::new(table.clone(), vec!["shim".to_string()], 5);

        assert_eq!(walker.find_boundary(50).await.unwrap(), None);
        assert_eq!(table.lookups.load(Ordering::SeqCst), 6);
    }
}

//! Linux procfs process inspector
//!
//! Reads process state from a procfs mount:
//! - `<pid>/stat` for the kernel comm name and parent pid
//! - `<pid>/status` for the real uid
//! - `<pid>/cmdline` for argv

use super::ProcessInspector;
use crate::error::ProcfsError;
use crate::models::{ProcessFacts, ProcessStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use nix::errno::Errno;
use nix::unistd::{Uid, User};
use std::path::{Path, PathBuf};
use tokio::fs;

/// The kernel truncates comm to 15 bytes
const COMM_MAX_LEN: usize = 15;

/// Placeholder command for zombies and kernel threads
const UNKNOWN_COMMAND: &str = "?";

/// Process inspector backed by a procfs mount
pub struct ProcfsInspector {
    proc_root: PathBuf,
    /// uid -> username, users rarely change during the agent's lifetime
    usernames: DashMap<u32, String>,
}

impl ProcfsInspector {
    /// Create an inspector reading from `/proc`
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Create an inspector with a custom procfs root (for testing)
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            usernames: DashMap::new(),
        }
    }

    /// Parse `/proc/<pid>/stat` contents
    /// Returns (comm, ppid)
    pub fn parse_stat(content: &str) -> Option<(String, i32)> {
        // comm may itself contain spaces and parentheses
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        if close < open {
            return None;
        }
        let comm = content[open + 1..close].to_string();

        let mut fields = content[close + 1..].split_whitespace();
        let _state = fields.next()?;
        let ppid = fields.next()?.parse().ok()?;

        Some((comm, ppid))
    }

    /// Extract the real uid from `/proc/<pid>/status` contents
    pub fn parse_status_uid(content: &str) -> Option<u32> {
        content
            .lines()
            .find_map(|line| line.strip_prefix("Uid:"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|uid| uid.parse().ok())
    }

    /// First argument of a NUL-separated cmdline, if any
    pub fn parse_cmdline(content: &[u8]) -> Option<String> {
        content
            .split(|b| *b == 0)
            .find(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
    }

    /// Short command name, as `ps -o comm` would print it
    pub fn command_name(argv0: Option<&str>) -> String {
        argv0
            .and_then(|arg| Path::new(arg).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| UNKNOWN_COMMAND.to_string())
    }

    /// Process name with comm truncation undone where argv allows it
    fn process_name(comm: String, argv0: Option<&str>) -> String {
        if comm.len() < COMM_MAX_LEN {
            return comm;
        }
        match argv0.and_then(|arg| Path::new(arg).file_name()) {
            Some(base) => {
                let base = base.to_string_lossy();
                if base.starts_with(&comm) {
                    base.into_owned()
                } else {
                    comm
                }
            }
            None => comm,
        }
    }

    fn username(&self, uid: u32) -> String {
        if let Some(name) = self.usernames.get(&uid) {
            return name.clone();
        }

        let name = User::from_uid(Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| uid.to_string());
        self.usernames.insert(uid, name.clone());
        name
    }

    fn pid_path(&self, pid: i32, file: &str) -> PathBuf {
        self.proc_root.join(pid.to_string()).join(file)
    }

    async fn read_bytes(&self, pid: i32, file: &str) -> Result<Vec<u8>, ProcfsError> {
        fs::read(self.pid_path(pid, file))
            .await
            .map_err(|source| Self::classify_io(pid, source))
    }

    async fn read_string(&self, pid: i32, file: &str) -> Result<String, ProcfsError> {
        let bytes = self.read_bytes(pid, file).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Missing entries and ESRCH both mean the process is gone
    fn classify_io(pid: i32, source: std::io::Error) -> ProcfsError {
        if source.kind() == std::io::ErrorKind::NotFound
            || source.raw_os_error() == Some(Errno::ESRCH as i32)
        {
            ProcfsError::NoSuchProcess(pid)
        } else {
            ProcfsError::Io { pid, source }
        }
    }

    async fn argv0(&self, pid: i32) -> Result<Option<String>, ProcfsError> {
        let cmdline = self.read_bytes(pid, "cmdline").await?;
        Ok(Self::parse_cmdline(&cmdline))
    }
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessInspector for ProcfsInspector {
    async fn facts(&self, pid: i32) -> Result<ProcessFacts, ProcfsError> {
        let status = self.read_string(pid, "status").await?;
        let uid = Self::parse_status_uid(&status).ok_or_else(|| ProcfsError::Malformed {
            pid,
            detail: "status has no Uid line".into(),
        })?;
        let argv0 = self.argv0(pid).await?;

        Ok(ProcessFacts {
            pid,
            username: self.username(uid),
            command: Self::command_name(argv0.as_deref()),
        })
    }

    async fn status(&self, pid: i32) -> Result<ProcessStatus, ProcfsError> {
        let stat = self.read_string(pid, "stat").await?;
        let (comm, ppid) = Self::parse_stat(&stat).ok_or_else(|| ProcfsError::Malformed {
            pid,
            detail: "unparseable stat line".into(),
        })?;

        let name = if comm.len() >= COMM_MAX_LEN {
            let argv0 = self.argv0(pid).await?;
            Self::process_name(comm, argv0.as_deref())
        } else {
            comm
        };

        Ok(ProcessStatus { pid, ppid, name })
    }
}

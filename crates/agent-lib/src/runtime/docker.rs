//! Docker CLI runtime
//!
//! Talks to the Docker daemon through the `docker` binary:
//! - `docker ps -q` lists running container ids
//! - `docker inspect --format ...` resolves all of them in one invocation

use super::ContainerRuntime;
use crate::error::RuntimeError;
use crate::models::ContainerRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const INSPECT_FORMAT: &str = "{{.State.Pid}} {{.Name}} {{.Id}}";

/// Container runtime backed by the Docker CLI.
///
/// Child processes are killed when the calling future is dropped, so callers
/// bound each call with `tokio::time::timeout`.
pub struct DockerCliRuntime {
    binary: PathBuf,
}

impl DockerCliRuntime {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker binary (or a compatible CLI)
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Parse `docker ps -q` output
    pub fn parse_ps_output(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Parse `docker inspect` output produced with [`INSPECT_FORMAT`]
    pub fn parse_inspect_output(stdout: &str) -> Vec<ContainerRecord> {
        stdout
            .lines()
            .filter_map(|line| {
                let line = line.trim().trim_matches('\'');
                let mut parts = line.split_whitespace();
                let pid: i32 = parts.next()?.parse().ok()?;
                let name = parts.next()?.trim_start_matches('/');
                let id = parts.next()?;

                // Stopped containers report pid 0
                if pid <= 0 {
                    return None;
                }

                Some(ContainerRecord {
                    boundary_pid: pid,
                    raw_name: name.to_string(),
                    container_id: id.to_string(),
                })
            })
            .collect()
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut command = self.binary.display().to_string();
        for arg in args.iter().take(3) {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    /// Run the CLI, returning stdout and whether it exited successfully
    async fn run(&self, args: &[&str]) -> Result<(String, bool, String), RuntimeError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                command: self.describe(args),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((stdout, output.status.success(), stderr))
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn list_container_ids(&self) -> Result<Vec<String>, RuntimeError> {
        let args = ["ps", "-q"];
        let (stdout, success, stderr) = self.run(&args).await?;
        if !success {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                status: "non-zero exit".into(),
                stderr,
            });
        }
        Ok(Self::parse_ps_output(&stdout))
    }

    async fn inspect(&self, ids: &[String]) -> Result<Vec<ContainerRecord>, RuntimeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect", "--format", INSPECT_FORMAT];
        args.extend(ids.iter().map(String::as_str));

        let (stdout, success, stderr) = self.run(&args).await?;
        let records = Self::parse_inspect_output(&stdout);

        if !success {
            // A container that exits between `ps` and `inspect` makes the
            // whole command fail while the rest are still printed
            if records.is_empty() {
                return Err(RuntimeError::CommandFailed {
                    command: self.describe(&args),
                    status: "non-zero exit".into(),
                    stderr,
                });
            }
            debug!(
                requested = ids.len(),
                inspected = records.len(),
                stderr = %stderr,
                "Partial docker inspect result"
            );
        }

        Ok(records)
    }
}

//! Error types for attribution and its external collaborators

use crate::identity::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a raw GPU process was excluded from a tick's attributed output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    ProcessExited,
    NoContainerBoundary,
    ContainerNotInInventory,
    UnparseableIdentity,
    Timeout,
    ExternalCallFailure,
}

impl SkipReason {
    pub const ALL: [SkipReason; 6] = [
        SkipReason::ProcessExited,
        SkipReason::NoContainerBoundary,
        SkipReason::ContainerNotInInventory,
        SkipReason::UnparseableIdentity,
        SkipReason::Timeout,
        SkipReason::ExternalCallFailure,
    ];

    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ProcessExited => "process-exited",
            SkipReason::NoContainerBoundary => "no-container-boundary",
            SkipReason::ContainerNotInInventory => "container-not-in-inventory",
            SkipReason::UnparseableIdentity => "unparseable-identity",
            SkipReason::Timeout => "timeout",
            SkipReason::ExternalCallFailure => "external-call-failure",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-process attribution failure. Never fatal to a tick.
#[derive(Debug, Clone, Error)]
pub enum AttributionError {
    #[error("process {pid} exited before it could be inspected")]
    ProcessExited { pid: i32 },

    #[error("no container boundary found above process {pid}")]
    ContainerBoundaryNotFound { pid: i32 },

    #[error("boundary process {boundary_pid} is not in the runtime inventory")]
    ContainerNotInInventory { boundary_pid: i32 },

    #[error(transparent)]
    IdentityParseError(#[from] ParseError),

    #[error("{operation} timed out after {timeout:?}")]
    ExternalCallTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} failed: {message}")]
    ExternalCallFailure {
        operation: &'static str,
        message: String,
    },
}

impl AttributionError {
    pub fn reason(&self) -> SkipReason {
        match self {
            AttributionError::ProcessExited { .. } => SkipReason::ProcessExited,
            AttributionError::ContainerBoundaryNotFound { .. } => SkipReason::NoContainerBoundary,
            AttributionError::ContainerNotInInventory { .. } => {
                SkipReason::ContainerNotInInventory
            }
            AttributionError::IdentityParseError(_) => SkipReason::UnparseableIdentity,
            AttributionError::ExternalCallTimeout { .. } => SkipReason::Timeout,
            AttributionError::ExternalCallFailure { .. } => SkipReason::ExternalCallFailure,
        }
    }
}

/// Errors from OS process introspection
#[derive(Debug, Error)]
pub enum ProcfsError {
    #[error("no such process: {0}")]
    NoSuchProcess(i32),

    #[error("malformed procfs entry for pid {pid}: {detail}")]
    Malformed { pid: i32, detail: String },

    #[error("failed to read procfs entry for pid {pid}")]
    Io {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
}

impl ProcfsError {
    pub fn into_attribution(self, operation: &'static str) -> AttributionError {
        match self {
            ProcfsError::NoSuchProcess(pid) => AttributionError::ProcessExited { pid },
            other => AttributionError::ExternalCallFailure {
                operation,
                message: other.to_string(),
            },
        }
    }
}

/// Errors from the container runtime collaborator
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
    },

    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

impl RuntimeError {
    pub fn into_attribution(self, operation: &'static str) -> AttributionError {
        match self {
            RuntimeError::Timeout { timeout, .. } => {
                AttributionError::ExternalCallTimeout { operation, timeout }
            }
            other => AttributionError::ExternalCallFailure {
                operation,
                message: other.to_string(),
            },
        }
    }
}

/// Tick-wide failure of the GPU telemetry collaborator
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("GPU driver initialisation failed: {0}")]
    Init(String),

    #[error("GPU device enumeration failed: {0}")]
    Enumeration(String),

    #[error("GPU telemetry timed out after {0:?}")]
    Timeout(Duration),

    #[error("GPU telemetry worker failed: {0}")]
    Worker(String),
}

/// Invalid attribution configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

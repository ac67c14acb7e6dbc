//! Workload identity parsing
//!
//! Kubelet names the containers it creates through the Docker runtime as
//! `k8s_<container>_<pod>_<namespace>_<pod-uid>[_<attempt>]`. The first
//! three fields after the prefix are the workload identity; everything after
//! them is discarded.

use crate::models::WorkloadIdentity;
use thiserror::Error;

/// Prefix kubelet puts in front of every container it manages
pub const KUBELET_PREFIX: &str = "k8s";

const SEPARATOR: char = '_';

/// Minimum number of segments: prefix, container, pod, namespace, hash
const MIN_SEGMENTS: usize = 5;

/// Container name that does not follow the kubelet naming convention
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("container name {name:?} has {segments} segments, expected at least {MIN_SEGMENTS}")]
    WrongSegmentCount { name: String, segments: usize },

    /// Only kubelet-created containers are attributed. Names that merely
    /// share the segment layout under another prefix are rejected on purpose.
    #[error("container name {name:?} does not start with {KUBELET_PREFIX:?}")]
    UnexpectedPrefix { name: String },

    #[error("container name {name:?} has an empty identity segment")]
    EmptySegment { name: String },
}

/// Parse a runtime container name into its workload identity
pub fn parse(raw_name: &str) -> Result<WorkloadIdentity, ParseError> {
    // Docker reports names with a leading slash
    let name = raw_name.trim().trim_start_matches('/');
    let segments: Vec<&str> = name.split(SEPARATOR).collect();

    if segments.len() < MIN_SEGMENTS {
        return Err(ParseError::WrongSegmentCount {
            name: raw_name.to_string(),
            segments: segments.len(),
        });
    }

    if segments[0] != KUBELET_PREFIX {
        return Err(ParseError::UnexpectedPrefix {
            name: raw_name.to_string(),
        });
    }

    let (container_name, pod_name, namespace) = (segments[1], segments[2], segments[3]);
    if container_name.is_empty() || pod_name.is_empty() || namespace.is_empty() {
        return Err(ParseError::EmptySegment {
            name: raw_name.to_string(),
        });
    }

    Ok(WorkloadIdentity {
        pod_name: pod_name.to_string(),
        namespace: namespace.to_string(),
        container_name: container_name.to_string(),
    })
}

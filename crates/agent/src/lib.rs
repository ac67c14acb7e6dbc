//! GPU usage agent
//!
//! Runs as a DaemonSet on each GPU node, attributing GPU memory to the pods
//! that hold it and exposing health and metrics over HTTP.

pub mod api;
pub mod config;

//! Sampling ticks
//!
//! One tick samples GPU processes, attributes them to workloads, aggregates
//! per device and hands the result to the configured sinks. Ticks are
//! serialized: after a tick overruns the poll interval, the first start it
//! overlapped runs late and the remaining ones are skipped and counted as
//! dropped.

mod r#loop;
mod report;

#[cfg(test)]
mod tests;

pub use r#loop::{skipped_ticks, SamplingLoop, SamplingLoopBuilder};
pub use report::{SkipTally, TickError, TickReport};

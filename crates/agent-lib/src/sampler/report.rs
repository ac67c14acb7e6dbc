//! Tick results

use crate::error::{SkipReason, TelemetryError};
use crate::models::GpuUsageDatum;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Number of skipped GPU processes per reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipTally {
    counts: BTreeMap<SkipReason, u64>,
}

impl SkipTally {
    pub fn record(&mut self, reason: SkipReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: SkipReason) -> u64 {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkipReason, u64)> + '_ {
        self.counts.iter().map(|(reason, count)| (*reason, *count))
    }
}

impl fmt::Display for SkipTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (reason, count) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{reason}={count}")?;
            first = false;
        }
        Ok(())
    }
}

/// Result of one successful sampling tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub data: Vec<GpuUsageDatum>,
    pub tally: SkipTally,
    /// GPU processes attributed to a workload
    pub attributed: usize,
    pub elapsed: Duration,
}

impl TickReport {
    pub fn skipped(&self) -> u64 {
        self.tally.total()
    }
}

/// Tick-wide failure: the tick produced no usage data
#[derive(Debug, Error)]
pub enum TickError {
    #[error("GPU telemetry unavailable: {0}")]
    Telemetry(#[from] TelemetryError),
}

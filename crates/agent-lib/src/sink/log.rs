//! Structured log sink

use super::UsageSink;
use crate::models::GpuUsageDatum;
use crate::observability::StructuredLogger;
use anyhow::Result;
use async_trait::async_trait;

/// Writes one structured log event per usage datum
pub struct LogSink {
    logger: StructuredLogger,
}

impl LogSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl UsageSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, data: &[GpuUsageDatum]) -> Result<()> {
        for datum in data {
            self.logger.log_usage(datum);
        }
        Ok(())
    }
}

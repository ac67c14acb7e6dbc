//! InfluxDB sink
//!
//! Writes usage with the InfluxDB 1.x line protocol. Memory is reported in
//! MiB under the `gpu/usage` measurement, tagged with node, device and
//! workload identity.

use super::UsageSink;
use crate::models::GpuUsageDatum;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const MEASUREMENT: &str = "gpu/usage";

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Connection settings for an InfluxDB 1.x server
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://influxdb:8086`
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Sink posting line protocol to `/write`
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    database: String,
    credentials: Option<(String, Option<String>)>,
    node_name: String,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig, node_name: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build InfluxDB HTTP client")?;

        // Credentials travel in the Authorization header, never in the URL
        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));

        Ok(Self {
            client,
            write_url: format!("{}/write", config.url.trim_end_matches('/')),
            database: config.database.clone(),
            credentials,
            node_name: node_name.into(),
        })
    }

    /// Escape a tag key or value: commas, equals signs and spaces
    fn escape_tag(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            if matches!(c, ',' | '=' | ' ' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    /// One line-protocol point, timestamped in nanoseconds
    pub fn line(node_name: &str, datum: &GpuUsageDatum) -> String {
        let tags = [
            ("nodename", node_name.to_string()),
            ("gpu_name", datum.gpu_name.clone()),
            ("gpu_uuid", datum.gpu_uuid.clone()),
            ("gpu_index", datum.gpu_index.to_string()),
            ("pod_name", datum.pod_name.clone()),
            ("pod_container_name", datum.container_name.clone()),
            ("namespace_name", datum.namespace.clone()),
        ];

        let mut line = MEASUREMENT.to_string();
        for (key, value) in tags.iter().filter(|(_, v)| !v.is_empty()) {
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(&Self::escape_tag(value));
        }
        line.push_str(&format!(
            " value={}i {}",
            datum.used_memory_bytes / BYTES_PER_MIB,
            datum.sample_timestamp.saturating_mul(1_000_000)
        ));
        line
    }

    pub fn body(&self, data: &[GpuUsageDatum]) -> String {
        data.iter()
            .map(|datum| Self::line(&self.node_name, datum))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl UsageSink for InfluxSink {
    fn name(&self) -> &str {
        "influx"
    }

    async fn emit(&self, data: &[GpuUsageDatum]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[("db", &self.database)])
            .body(self.body(data));
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        request
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to reach InfluxDB at {}", self.write_url))?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("InfluxDB rejected the write")?;

        debug!(points = data.len(), "Wrote GPU usage to InfluxDB");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum() -> GpuUsageDatum {
        GpuUsageDatum {
            gpu_index: 0,
            gpu_uuid: "GPU-5e6f".to_string(),
            gpu_name: "Tesla V100-SXM2-16GB".to_string(),
            pod_name: "bert-7f".to_string(),
            namespace: "ml".to_string(),
            container_name: "infer".to_string(),
            used_memory_bytes: 3 * BYTES_PER_MIB + 512,
            sample_timestamp: 1_700_000_000_123,
        }
    }

    fn config(url: &str) -> InfluxConfig {
        InfluxConfig {
            url: url.to_string(),
            database: "gpu".to_string(),
            username: Some("writer".to_string()),
            password: None,
        }
    }

    #[test]
    fn test_line_protocol() {
        let line = InfluxSink::line("gpu-node-1", &datum());
        assert_eq!(
            line,
            "gpu/usage,nodename=gpu-node-1,gpu_name=Tesla\\ V100-SXM2-16GB,gpu_uuid=GPU-5e6f,\
             gpu_index=0,pod_name=bert-7f,pod_container_name=infer,namespace_name=ml \
             value=3i 1700000000123000000"
        );
    }

    #[test]
    fn test_escape_tag() {
        assert_eq!(InfluxSink::escape_tag("a,b=c d"), "a\\,b\\=c\\ d");
    }

    #[test]
    fn test_body_joins_points() {
        let sink = InfluxSink::new(&config("http://influxdb:8086/"), "n", Duration::from_secs(1)).unwrap();
        assert_eq!(sink.write_url, "http://influxdb:8086/write");
        assert_eq!(sink.database, "gpu");
        assert_eq!(sink.credentials, Some(("writer".to_string(), None)));
        assert_eq!(sink.body(&[datum(), datum()]).lines().count(), 2);
    }

    #[tokio::test]
    async fn test_emit_nothing_is_noop() {
        // Unroutable address: any request would fail
        let sink = InfluxSink::new(&config("http://127.0.0.1:9"), "n", Duration::from_millis(100)).unwrap();
        assert!(sink.emit(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_write_does_not_reveal_password() {
        let mut config = config("http://127.0.0.1:9");
        config.password = Some("s3cr3t".to_string());
        let sink = InfluxSink::new(&config, "n", Duration::from_millis(200)).unwrap();

        let err = sink.emit(&[datum()]).await.unwrap_err();
        let rendered = format!("{err:#} {err:?}");

        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("writer"));
    }

    #[tokio::test]
    async fn test_emit_unreachable_server_fails() {
        let sink = InfluxSink::new(&config("http://127.0.0.1:9"), "n", Duration::from_millis(200)).unwrap();
        assert!(sink.emit(&[datum()]).await.is_err());
    }
}

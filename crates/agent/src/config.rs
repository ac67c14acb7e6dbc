//! Agent configuration

use anyhow::{Context, Result};
use gpu_agent_lib::config::{AttributionConfig, DEFAULT_SUPERVISOR_NAMES};
use gpu_agent_lib::sink::InfluxConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "GPU_AGENT_CONFIG";

const ENV_PREFIX: &str = "GPU_AGENT";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Sampling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Lifetime of a container inventory snapshot in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// How long past its TTL a snapshot may serve when rebuilds fail
    #[serde(default = "default_rebuild_grace")]
    pub rebuild_grace_secs: u64,

    /// Bound on every procfs lookup and runtime query
    #[serde(default = "default_external_call_timeout")]
    pub external_call_timeout_ms: u64,

    /// Concurrent attributions per tick
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Process names of container runtime shims
    #[serde(default = "default_supervisor_names")]
    pub supervisor_names: Vec<String>,

    #[serde(default = "default_docker_binary")]
    pub docker_binary: PathBuf,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Also log every usage datum
    #[serde(default)]
    pub log_sink: bool,

    #[serde(default)]
    pub influx: Option<InfluxConfig>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    10
}

fn default_cache_ttl() -> u64 {
    10
}

fn default_rebuild_grace() -> u64 {
    60
}

fn default_external_call_timeout() -> u64 {
    5000
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_supervisor_names() -> Vec<String> {
    DEFAULT_SUPERVISOR_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_docker_binary() -> PathBuf {
    PathBuf::from("docker")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

impl AgentConfig {
    /// Load configuration from an optional file overlaid with the environment.
    ///
    /// The file is the first command line argument, else `$GPU_AGENT_CONFIG`.
    pub fn load() -> Result<Self> {
        let path = std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .map(PathBuf::from);
        Self::load_from(path.as_deref(), config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from `file` (format by extension) and `env`
    pub fn load_from(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("supervisor_names"),
            )
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    /// Configuration consumed by the attribution core
    pub fn attribution(&self) -> AttributionConfig {
        AttributionConfig::default()
            .poll_interval(Duration::from_secs(self.poll_interval_secs))
            .cache_ttl(Duration::from_secs(self.cache_ttl_secs))
            .rebuild_grace(Duration::from_secs(self.rebuild_grace_secs))
            .external_call_timeout(Duration::from_millis(self.external_call_timeout_ms))
            .worker_concurrency(self.worker_concurrency)
            .supervisor_names(self.supervisor_names.iter().cloned())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load_from(None, env(&[])).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.cache_ttl_secs, 10);
        assert_eq!(config.rebuild_grace_secs, 60);
        assert_eq!(config.external_call_timeout_ms, 5000);
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.supervisor_names, default_supervisor_names());
        assert_eq!(config.docker_binary, PathBuf::from("docker"));
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
        assert!(!config.log_sink);
        assert!(config.influx.is_none());
        assert!(config.attribution().validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::load_from(
            None,
            env(&[
                ("GPU_AGENT_POLL_INTERVAL_SECS", "30"),
                ("GPU_AGENT_WORKER_CONCURRENCY", "2"),
                ("GPU_AGENT_SUPERVISOR_NAMES", "conmon,containerd-shim"),
                ("GPU_AGENT_INFLUX__URL", "http://influxdb:8086"),
                ("GPU_AGENT_INFLUX__DATABASE", "gpu"),
            ]),
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.supervisor_names, vec!["conmon", "containerd-shim"]);
        let influx = config.influx.unwrap();
        assert_eq!(influx.url, "http://influxdb:8086");
        assert_eq!(influx.database, "gpu");
        assert!(influx.username.is_none());
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "node_name: gpu-node-7\ncache_ttl_secs: 20\nlog_sink: true").unwrap();

        let config = AgentConfig::load_from(
            Some(file.path()),
            env(&[("GPU_AGENT_CACHE_TTL_SECS", "5")]),
        )
        .unwrap();

        assert_eq!(config.node_name, "gpu-node-7");
        assert_eq!(config.cache_ttl_secs, 5);
        assert!(config.log_sink);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load_from(Some(Path::new("/nonexistent/agent.yaml")), env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_attribution_config() {
        let config = AgentConfig::load_from(
            None,
            env(&[("GPU_AGENT_EXTERNAL_CALL_TIMEOUT_MS", "250")]),
        )
        .unwrap();
        let attribution = config.attribution();

        assert_eq!(attribution.external_call_timeout, Duration::from_millis(250));
        assert_eq!(attribution.rebuild_grace, Duration::from_secs(60));
    }
}

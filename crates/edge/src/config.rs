//! Agent configuration, read from `etc/edge.conf` (TOML).
//!
//! Every table and key is optional. A missing file yields the defaults; a
//! file that cannot be read or parsed stops the agent at startup.

use anyhow::{Context, Result};
use edge_control::ControlPlaneConfig;
use edge_logging::{LogConfig, DEFAULT_MAX_LOG_FILES, DEFAULT_MAX_LOG_FILE_SIZE};
use edge_protocol::defaults::{
    DEFAULT_METRICS_PUBLISH_INTERVAL_MILLIS, DEFAULT_PROCESS_METRICS_INTERVAL_MILLIS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub http: HttpConfig,
    pub control_plane: ControlPlaneConfig,
    pub execution: ExecutionConfig,
    pub process_metrics: ProcessMetricsConfig,
    pub log: LogSettings,
}

/// How the agent is reached; announced at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:18633".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Period at which remote pipelines publish their metrics.
    pub metrics_publish_interval_millis: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            metrics_publish_interval_millis: DEFAULT_METRICS_PUBLISH_INTERVAL_MILLIS,
        }
    }
}

impl ExecutionConfig {
    pub fn metrics_publish_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_publish_interval_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessMetricsConfig {
    pub enabled: bool,
    pub interval_millis: u64,
}

impl Default for ProcessMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_millis: DEFAULT_PROCESS_METRICS_INTERVAL_MILLIS,
        }
    }
}

impl ProcessMetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    pub max_files: usize,
    pub max_file_size: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: None,
            max_files: DEFAULT_MAX_LOG_FILES,
            max_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
        }
    }
}

impl LogSettings {
    pub fn to_log_config(&self, log_dir: &Path, verbose: bool) -> LogConfig {
        let mut config = LogConfig::new(log_dir);
        config.verbose = verbose;
        config.filter = self.filter.clone();
        config.max_files = self.max_files;
        config.max_file_size = self.max_file_size;
        config
    }
}

impl EdgeConfig {
    /// Loads `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_means_defaults() {
        let temp = TempDir::new().unwrap();
        let config = EdgeConfig::load(&temp.path().join("edge.conf")).unwrap();
        assert_eq!(config, EdgeConfig::default());
        assert!(!config.control_plane.enabled);
        assert!(config.process_metrics.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = EdgeConfig::parse(
            r#"
            [control_plane]
            enabled = true
            base_url = "https://cp.example.com"
            app_auth_token = "secret"
            labels = ["plant-7"]

            [execution]
            metrics_publish_interval_millis = 1000

            [log]
            filter = "edge=warn"
            "#,
        )
        .unwrap();
        assert!(config.control_plane.enabled);
        assert_eq!(config.control_plane.labels, vec!["plant-7"]);
        assert!(config.control_plane.register);
        assert_eq!(
            config.execution.metrics_publish_interval(),
            Duration::from_secs(1)
        );
        assert_eq!(config.log.filter.as_deref(), Some("edge=warn"));
        assert_eq!(config.log.max_files, DEFAULT_MAX_LOG_FILES);
        assert_eq!(config.http, HttpConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("edge.conf");
        std::fs::write(&path, "[control_plane\nenabled = ").unwrap();
        let err = EdgeConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid config"));

        std::fs::write(&path, "[process_metrics]\nenabled = \"yes\"\n").unwrap();
        assert!(EdgeConfig::load(&path).is_err());
    }

    #[test]
    fn test_log_settings_carry_over() {
        let settings = LogSettings {
            filter: Some("edge=trace".into()),
            max_files: 2,
            max_file_size: 1024,
        };
        let config = settings.to_log_config(Path::new("/var/log/edge"), true);
        assert!(config.verbose);
        assert_eq!(config.filter.as_deref(), Some("edge=trace"));
        assert_eq!(config.max_files, 2);
        assert_eq!(config.max_file_size, 1024);
    }
}

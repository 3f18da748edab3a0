//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files with environment variable
//! interpolation.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{
    ConfigError, EmptyScriptCommandSnafu, EmptySinkPathSnafu, EmptySourcePathSnafu,
    EnvInterpolationSnafu, ReadFileSnafu, SourceIsSinkSnafu, YamlParseSnafu, ZeroMaxStagedSnafu,
};

pub use vars::{InterpolationResult, interpolate};

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name used in log lines and metric labels (default: "default").
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub script: ScriptConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Error handling configuration (optional).
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

fn default_pipeline_name() -> String {
    "default".to_string()
}

/// Where batches are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Directory whose immediate sub-directories are the input batches.
    pub path: PathBuf,

    /// Parent directory for batch working directories (default: system temp dir).
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Staged batches allowed to wait for processing (default: 4).
    #[serde(default = "default_max_staged")]
    pub max_staged: usize,
}

fn default_max_staged() -> usize {
    4
}

/// Where transformed batches are written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Directory receiving one sub-directory per uploaded batch.
    pub path: PathBuf,
}

/// The transformation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    /// Program followed by its arguments. The working directory is appended.
    pub command: Vec<String>,

    /// Extra environment variables for the script.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Error handling configuration for resilient pipeline execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandlingConfig {
    /// Directory to write failed batch records to (enables the DLQ).
    #[serde(default)]
    pub dlq_path: Option<PathBuf>,
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let interpolated;
        let content = if interpolate_env {
            let result = interpolate(content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            interpolated = result.text;
            interpolated.as_str()
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.path.as_os_str().is_empty(), EmptySourcePathSnafu);
        ensure!(!self.sink.path.as_os_str().is_empty(), EmptySinkPathSnafu);
        ensure!(self.source.max_staged > 0, ZeroMaxStagedSnafu);
        ensure!(
            self.script.command.first().is_some_and(|p| !p.is_empty()),
            EmptyScriptCommandSnafu
        );
        ensure!(
            self.source.path != self.sink.path,
            SourceIsSinkSnafu {
                path: self.source.path.clone()
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  path: /data/incoming
sink:
  path: /data/outgoing
script:
  command: ["python3", "transform.py"]
"#;

    #[test]
    fn test_config_yaml_parsing() {
        let config = Config::from_yaml(MINIMAL, false).unwrap();

        assert_eq!(config.name, "default");
        assert_eq!(config.source.path, PathBuf::from("/data/incoming"));
        assert!(config.source.staging_dir.is_none());
        assert_eq!(config.source.max_staged, 4);
        assert_eq!(config.sink.path, PathBuf::from("/data/outgoing"));
        assert_eq!(config.script.command, vec!["python3", "transform.py"]);
        assert!(config.script.env.is_empty());
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
        assert!(config.error_handling.dlq_path.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
name: nightly
source:
  path: /data/incoming
  staging_dir: /scratch
  max_staged: 2
sink:
  path: /data/outgoing
script:
  command: ["./convert.sh"]
  env:
    MODE: strict
metrics:
  enabled: true
  address: "127.0.0.1:9100"
error_handling:
  dlq_path: /data/dlq
"#;
        let config = Config::from_yaml(yaml, false).unwrap();

        assert_eq!(config.name, "nightly");
        assert_eq!(config.source.staging_dir, Some(PathBuf::from("/scratch")));
        assert_eq!(config.source.max_staged, 2);
        assert_eq!(config.script.env.get("MODE").map(String::as_str), Some("strict"));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "127.0.0.1:9100");
        assert_eq!(config.error_handling.dlq_path, Some(PathBuf::from("/data/dlq")));
    }

    #[test]
    fn test_empty_command_rejected() {
        let yaml = MINIMAL.replace(r#"["python3", "transform.py"]"#, "[]");
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyScriptCommand));
    }

    #[test]
    fn test_zero_max_staged_rejected() {
        let yaml = MINIMAL.replace(
            "  path: /data/incoming\n",
            "  path: /data/incoming\n  max_staged: 0\n",
        );
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroMaxStaged));
    }

    #[test]
    fn test_source_equal_to_sink_rejected() {
        let yaml = MINIMAL.replace("/data/outgoing", "/data/incoming");
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::SourceIsSink { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{MINIMAL}retries: 3\n");
        let err = Config::from_yaml(&yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_missing_env_var_reported() {
        let yaml = MINIMAL.replace("/data/incoming", "${FLURRY_TEST_CONFIG_UNSET_ROOT}");
        let err = Config::from_yaml(&yaml, true).unwrap_err();
        assert!(err.to_string().contains("FLURRY_TEST_CONFIG_UNSET_ROOT"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flurry.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sink.path, PathBuf::from("/data/outgoing"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/flurry.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}

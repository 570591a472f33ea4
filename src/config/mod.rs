//! Simulator configuration
//!
//! A single YAML document with every tunable. Missing keys fall back to the
//! built-in defaults, so an empty file (or no file) is a valid configuration.
//!
//! ```yaml
//! server:
//!   bind_addr: 0.0.0.0
//!   port: 5000
//! cluster:
//!   heartbeat_threshold_secs: 15
//!   autoscale_threshold: 0.8
//! docker:
//!   enabled: true
//!   image: node-simulator:latest
//! state_file: ~/.clustersim/state.json
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::ControllerConfig;
use crate::runtime::DockerConfig;

/// Default API port
pub const DEFAULT_PORT: u16 = 5000;

/// Errors for configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub server: ServerConfig,
    pub cluster: ControllerConfig,
    pub docker: DockerConfig,

    /// JSON state file; `None` keeps state in memory only
    pub state_file: Option<PathBuf>,
}

impl SimulatorConfig {
    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.cluster;
        if !(c.autoscale_threshold > 0.0 && c.autoscale_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "cluster.autoscale_threshold must be in (0, 1], got {}",
                c.autoscale_threshold
            )));
        }

        let intervals = [
            ("health_check_interval_secs", c.health_check_interval_secs),
            ("simulated_heartbeat_interval_secs", c.simulated_heartbeat_interval_secs),
            ("autoscale_interval_secs", c.autoscale_interval_secs),
            ("utilization_sample_interval_secs", c.utilization_sample_interval_secs),
            ("publish_interval_secs", c.publish_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!(
                "cluster.{} must be at least 1",
                name
            )));
        }

        Ok(())
    }

    /// `bind_addr:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.port)
    }
}

/// Default config location: `~/.clustersim/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".clustersim").join("config.yaml"))
}

// ============================================================================
// I/O wrapper
// ============================================================================

/// Load a config file; a missing file yields the defaults
pub fn load_config_file(path: &Path) -> Result<SimulatorConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => SimulatorConfig::from_yaml(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SimulatorConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_file() {
        let file = create_temp_file(
            r#"
server:
  port: 6000
cluster:
  heartbeat_threshold_secs: 30
docker:
  enabled: false
state_file: /tmp/cluster.json
"#,
        );

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.cluster.heartbeat_threshold_secs, 30);
        assert_eq!(config.cluster.autoscale_cooldown_secs, 60);
        assert!(!config.docker.enabled);
        assert_eq!(config.state_file, Some(PathBuf::from("/tmp/cluster.json")));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = load_config_file(Path::new("/nonexistent/clustersim.yaml")).unwrap();
        assert_eq!(config, SimulatorConfig::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = create_temp_file("   \n");
        assert_eq!(load_config_file(file.path()).unwrap(), SimulatorConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let file = create_temp_file("server: [unclosed");
        assert!(matches!(
            load_config_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let result = SimulatorConfig::from_yaml("cluster:\n  autoscale_threshold: 1.5\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = SimulatorConfig::from_yaml("cluster:\n  health_check_interval_secs: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/x.json")), home.join("x.json"));
        }
    }
}

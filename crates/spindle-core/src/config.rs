//! WorkerConfig - ワーカー設定（YAML）
//!
//! すべてのフィールドに既定値があるので、空ファイルでも起動できます。
//!
//! ```yaml
//! idle_delay_ms: 500
//! restart_mode: exit_process
//! services: [square]
//! overrides:
//!   square:
//!     max_processing_trials: 3
//!     execution_timeout_secs: 120
//! package:
//!   container: spindle-packages
//!   blob: package.bin
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::QueueServiceSettings;
use crate::impls::blob_package::{DEFAULT_PACKAGE_BLOB, DEFAULT_PACKAGE_CONTAINER};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the host does on a restart request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Tear down and rebuild the generation inside this process.
    #[default]
    InPlace,

    /// Stop and let an external supervisor start a fresh process.
    ExitProcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub container: String,
    pub blob: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_PACKAGE_CONTAINER.to_string(),
            blob: DEFAULT_PACKAGE_BLOB.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep after a pass that found no work.
    pub idle_delay_ms: u64,

    /// Wait before the host resumes after a classified failure.
    pub failure_backoff_ms: u64,

    pub package_check_interval_secs: u64,

    pub restart_mode: RestartMode,

    /// Enabled services, in visiting order. `None` runs every registered service.
    pub services: Option<Vec<String>>,

    /// Per-service settings keyed by service name.
    pub overrides: HashMap<String, QueueServiceSettings>,

    pub package: PackageConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: 1_000,
            failure_backoff_ms: 1_000,
            package_check_interval_secs: 60,
            restart_mode: RestartMode::InPlace,
            services: None,
            overrides: HashMap::new(),
            package: PackageConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // 空ファイルは null としてパースされる
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: WorkerConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.package_check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "package_check_interval_secs must be positive".into(),
            ));
        }
        if let Some(services) = &self.services {
            if services.is_empty() {
                return Err(ConfigError::Invalid(
                    "services must list at least one service when present".into(),
                ));
            }
            let mut seen = std::collections::HashSet::new();
            if let Some(duplicate) = services.iter().find(|name| !seen.insert(name.as_str())) {
                return Err(ConfigError::Invalid(format!(
                    "service '{duplicate}' is listed twice"
                )));
            }
        }
        for (service, settings) in &self.overrides {
            if settings.execution_timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "overrides.{service}.execution_timeout_secs must be positive"
                )));
            }
        }
        Ok(())
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn package_check_interval(&self) -> Duration {
        Duration::from_secs(self.package_check_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_is_all_defaults() {
        assert_eq!(WorkerConfig::from_yaml_str("").unwrap(), WorkerConfig::default());
        assert_eq!(WorkerConfig::from_yaml_str("{}").unwrap(), WorkerConfig::default());
    }

    #[test]
    fn reads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "idle_delay_ms: 250\n\
             restart_mode: exit_process\n\
             services: [square]\n\
             overrides:\n  square:\n    max_processing_trials: 3\n    queue_name: squares\n"
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.idle_delay(), Duration::from_millis(250));
        assert_eq!(config.restart_mode, RestartMode::ExitProcess);
        assert_eq!(config.services, Some(vec!["square".to_string()]));
        assert_eq!(config.overrides["square"].max_processing_trials, Some(3));
        assert_eq!(config.overrides["square"].queue_name.as_deref(), Some("squares"));
        assert_eq!(config.failure_backoff(), Duration::from_secs(1));
        assert_eq!(config.package, PackageConfig::default());
    }

    #[test]
    fn rejects_duplicate_services() {
        let result = WorkerConfig::from_yaml_str("services: [a, b, a]");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("'a'")));
    }

    #[test]
    fn rejects_unknown_restart_mode() {
        let result = WorkerConfig::from_yaml_str("restart_mode: sometimes");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = WorkerConfig::from_file("/definitely/not/here.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}

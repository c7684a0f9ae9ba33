use drainq::orchestrator::OrchestratorConfig;
use drainq::ratelimit::RateLimitConfig;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub orchestrator: OrchestratorConfig,
    pub executor: ExecutorConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Shell command run once per task (see `CommandExecutor`)
    pub command: Option<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds the run lock and the `checkpoints/` directory
    pub state_dir: PathBuf,
    /// Checkpoints retained by `cleanup` and after a finished run
    pub keep_checkpoints: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("drainq"),
            keep_checkpoints: 5,
        }
    }
}

impl StorageConfig {
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir.join("checkpoints")
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("drainq.yml");
        fs::write(
            &path,
            "rate_limit:\n  requests_per_minute: 10\norchestrator:\n  max_parallel: 8\nstorage:\n  keep_checkpoints: 2\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 10);
        assert_eq!(config.rate_limit.input_tokens_per_minute, 40_000);
        assert_eq!(config.orchestrator.max_parallel, 8);
        assert_eq!(config.rate_limit.backoff.max_retries, 3);
        assert!(!config.orchestrator.retry_failed_on_resume);
        assert_eq!(config.storage.keep_checkpoints, 2);
        assert!(config.executor.command.is_none());
    }

    #[test]
    fn test_executor_section() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("drainq.yml");
        fs::write(&path, "executor:\n  command: ./work.sh\nlog_level: debug\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.executor.command.as_deref(), Some("./work.sh"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("missing.yml"))).is_err());
    }

    #[test]
    fn test_checkpoint_dir_under_state_dir() {
        let storage = StorageConfig {
            state_dir: PathBuf::from("/var/lib/drainq"),
            keep_checkpoints: 1,
        };
        assert_eq!(storage.checkpoint_dir(), PathBuf::from("/var/lib/drainq/checkpoints"));
    }
}

//! Configuration settings for caresync.
//!
//! Settings are loaded from `config.yaml` under the data root. Missing
//! files and missing fields fall back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::error::SyncError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Queue and coordinator settings.
    pub sync: SyncConfig,
    /// Command adapter settings.
    pub adapter: AdapterConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
}

/// Delay strategy between passes that leave work pending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Always wait `retry_delay_ms`.
    Fixed,
    /// Double the delay per consecutive unfinished pass, up to the cap.
    #[default]
    Exponential,
}

/// Queue and coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts before an item is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay before retrying an unfinished pass.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Upper bound for exponential backoff.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Periodic timer interval while online.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long failed items are kept before cleanup removes them.
    #[serde(default = "default_failed_retention_hours")]
    pub failed_retention_hours: u64,
    /// Priority used when the caller does not give one.
    #[serde(default)]
    pub default_priority: i32,
}

/// Command adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Program and arguments invoked once per operation.
    #[serde(default)]
    pub command: Vec<String>,
    /// Per-call timeout.
    #[serde(default = "default_adapter_timeout_secs")]
    pub timeout_secs: u64,
    /// Exit codes treated as permanent rejections.
    #[serde(default = "default_permanent_exit_codes")]
    pub permanent_exit_codes: Vec<i32>,
}

const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    5_000
}

const fn default_max_retry_delay_ms() -> u64 {
    300_000
}

const fn default_poll_interval_secs() -> u64 {
    30
}

const fn default_failed_retention_hours() -> u64 {
    168 // one week
}

const fn default_adapter_timeout_secs() -> u64 {
    30
}

fn default_permanent_exit_codes() -> Vec<i32> {
    // sysexits: EX_DATAERR, EX_NOPERM, EX_CONFIG
    vec![65, 77, 78]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: BackoffStrategy::default(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            failed_retention_hours: default_failed_retention_hours(),
            default_priority: 0,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_adapter_timeout_secs(),
            permanent_exit_codes: default_permanent_exit_codes(),
        }
    }
}

impl SyncConfig {
    /// Periodic timer interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Retention window for failed items.
    #[must_use]
    pub fn failed_retention(&self) -> chrono::Duration {
        // Clamp to a century so the conversion cannot overflow.
        let hours = self.failed_retention_hours.min(24 * 365 * 100);
        chrono::Duration::hours(i64::try_from(hours).unwrap_or(0))
    }

    /// Delay before the next retry after `consecutive` unfinished passes.
    ///
    /// `consecutive` starts at 1 for the first unfinished pass.
    #[must_use]
    pub fn retry_delay(&self, consecutive: u32) -> Duration {
        let base = self.retry_delay_ms;
        let millis = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let shift = consecutive.saturating_sub(1).min(32);
                base.saturating_mul(1_u64 << shift)
                    .min(self.max_retry_delay_ms.max(base))
            },
        };
        Duration::from_millis(millis)
    }
}

impl AdapterConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.general.default_output, OutputFormat::Pretty);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.sync.poll_interval_secs, 30);
        assert!(config.adapter.command.is_empty());
        assert_eq!(config.adapter.permanent_exit_codes, vec![65, 77, 78]);
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let config = Config::load_from_path(&config_path).unwrap();
        assert_eq!(config.sync.retry_delay_ms, 5_000);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut config = Config::default();
        config.sync.max_retries = 5;
        config.adapter.command = vec!["fhir-push".to_string(), "--verbose".to_string()];

        config.save_to_path(&config_path).unwrap();
        let loaded = Config::load_from_path(&config_path).unwrap();

        assert_eq!(loaded.sync.max_retries, 5);
        assert_eq!(loaded.adapter.command, config.adapter.command);
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let partial_yaml = r"
sync:
  max_retries: 7
  backoff: fixed
";
        std::fs::write(&config_path, partial_yaml).unwrap();

        let config = Config::load_from_path(&config_path).unwrap();

        assert_eq!(config.sync.max_retries, 7);
        assert_eq!(config.sync.backoff, BackoffStrategy::Fixed);
        assert_eq!(config.sync.retry_delay_ms, 5_000);
        assert_eq!(config.adapter.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "sync: [not, a, map]").unwrap();

        assert!(matches!(
            Config::load_from_path(&config_path),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_retry_delay_fixed() {
        let config = SyncConfig {
            backoff: BackoffStrategy::Fixed,
            retry_delay_ms: 1_000,
            ..SyncConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(6), Duration::from_millis(1_000));
    }

    #[test]
    fn test_retry_delay_exponential_is_capped() {
        let config = SyncConfig {
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 10_000,
            ..SyncConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(2_000));
        assert_eq!(config.retry_delay(4), Duration::from_millis(8_000));
        assert_eq!(config.retry_delay(5), Duration::from_millis(10_000));
        assert_eq!(config.retry_delay(60), Duration::from_millis(10_000));
    }
}

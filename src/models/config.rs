use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::format::OutputFormat;
use crate::error::ConfigError;

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_BUFFER_SIZE: usize = 1_000;

const ENV_BATCH_SIZE: &str = "BATCHFLOW_BATCH_SIZE";
const ENV_MAX_CONCURRENT: &str = "BATCHFLOW_MAX_CONCURRENT_BATCHES";
const ENV_RATE_LIMIT: &str = "BATCHFLOW_RATE_LIMIT";

/// Immutable configuration for a batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJobConfig {
    /// Items per batch.
    pub batch_size: usize,
    /// Upper bound on simultaneously in-flight batches.
    pub max_concurrent_batches: usize,
    /// Timeout applied to each individual attempt.
    pub timeout_per_batch: Duration,
    /// Total number of attempts per batch.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Token refill rate, in items per second. `None` disables limiting.
    pub rate_limit_per_second: Option<f64>,
    /// Whether progress callbacks are invoked.
    pub progress_tracking_enabled: bool,
}

impl Default for BatchJobConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            timeout_per_batch: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            rate_limit_per_second: None,
            progress_tracking_enabled: true,
        }
    }
}

impl BatchJobConfig {
    /// Create a new configuration with the given batch size.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Set the concurrency bound.
    #[must_use]
    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_batch = timeout;
        self
    }

    /// Set the total number of attempts per batch.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enable rate limiting at the given items per second.
    #[must_use]
    pub fn with_rate_limit(mut self, per_second: f64) -> Self {
        self.rate_limit_per_second = Some(per_second);
        self
    }

    /// Enable or disable progress callbacks.
    #[must_use]
    pub fn with_progress_tracking(mut self, enabled: bool) -> Self {
        self.progress_tracking_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size < 1 {
            return Err(ConfigError::invalid("batch_size must be at least 1"));
        }
        if self.max_concurrent_batches < 1 {
            return Err(ConfigError::invalid(
                "max_concurrent_batches must be at least 1",
            ));
        }
        if self.retry_attempts < 1 {
            return Err(ConfigError::invalid("retry_attempts must be at least 1"));
        }
        if let Some(rate) = self.rate_limit_per_second
            && !(rate.is_finite() && rate > 0.0)
        {
            return Err(ConfigError::invalid(format!(
                "rate_limit_per_second must be positive, got {rate}"
            )));
        }
        Ok(())
    }
}

/// On-disk configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("batchflow").join("config.toml"))
    }

    /// Load the global config file, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::read(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load an explicit config file. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load `path` when one is given, otherwise the global config file.
    ///
    /// An explicit path that does not exist is an error rather than a silent
    /// fall back to the global config.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if !path.exists() => Err(ConfigError::PathError(format!(
                "config file not found: {}",
                path.display()
            ))),
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var(ENV_BATCH_SIZE) {
            self.engine.batch_size = parse_env(ENV_BATCH_SIZE, &value)?;
        }
        if let Some(value) = env_var(ENV_MAX_CONCURRENT) {
            self.engine.max_concurrent_batches = parse_env(ENV_MAX_CONCURRENT, &value)?;
        }
        if let Some(value) = env_var(ENV_RATE_LIMIT) {
            self.engine.rate_limit_per_second = Some(parse_env(ENV_RATE_LIMIT, &value)?);
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<V: std::str::FromStr>(key: &str, value: &str) -> Result<V, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(format!("{key} has an invalid value: {value}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_second: Option<f64>,

    #[serde(default = "default_progress_tracking")]
    pub progress_tracking: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_concurrent_batches() -> usize {
    DEFAULT_MAX_CONCURRENT_BATCHES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_progress_tracking() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            rate_limit_per_second: None,
            progress_tracking: default_progress_tracking(),
        }
    }
}

impl EngineConfig {
    /// Convert into a validated job configuration.
    pub fn to_job_config(&self) -> Result<BatchJobConfig, ConfigError> {
        let config = BatchJobConfig {
            batch_size: self.batch_size,
            max_concurrent_batches: self.max_concurrent_batches,
            timeout_per_batch: Duration::from_millis(self.timeout_ms),
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            rate_limit_per_second: self.rate_limit_per_second,
            progress_tracking_enabled: self.progress_tracking,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub default_format: OutputFormat,
}

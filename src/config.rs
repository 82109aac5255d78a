//! Configuration management for comment-harvest using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::SteamOptions;
use crate::harvest::{StabilityLimits, DEFAULT_BATCH_SIZE};
use crate::renderer::BrowserEngineConfig;
use crate::retry::RetryPolicy;

/// Stability-loop and batching limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Rows per durable write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum scroll cycles per target.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Pause after each scroll, in seconds.
    #[serde(default = "default_cycle_pause_secs")]
    pub cycle_pause_secs: f64,
    /// Wall-clock cap per target, in seconds.
    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,
    /// Consecutive unchanged counts that mean the list is exhausted.
    #[serde(default = "default_plateau_threshold")]
    pub plateau_threshold: u32,
    /// Extra checks before declaring a page empty.
    #[serde(default = "default_zero_grace_checks")]
    pub zero_grace_checks: u32,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_cycles() -> u32 {
    500
}

fn default_cycle_pause_secs() -> f64 {
    3.0
}

fn default_max_wall_clock_secs() -> u64 {
    1800
}

fn default_plateau_threshold() -> u32 {
    3
}

fn default_zero_grace_checks() -> u32 {
    2
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_cycles: default_max_cycles(),
            cycle_pause_secs: default_cycle_pause_secs(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
            plateau_threshold: default_plateau_threshold(),
            zero_grace_checks: default_zero_grace_checks(),
        }
    }
}

impl LimitsConfig {
    /// Fails when `cycle_pause_secs` is not a representable duration.
    pub fn stability_limits(&self) -> Result<StabilityLimits, String> {
        let cycle_pause = Duration::try_from_secs_f64(self.cycle_pause_secs.max(0.0))
            .map_err(|e| format!("Invalid cycle pause {}: {}", self.cycle_pause_secs, e))?;
        Ok(StabilityLimits {
            max_cycles: self.max_cycles.max(1),
            cycle_pause,
            max_wall_clock: Duration::from_secs(self.max_wall_clock_secs),
            plateau_threshold: self.plateau_threshold.max(1),
            zero_grace_checks: self.zero_grace_checks,
        })
    }
}

/// Retry policy for checkpoint and sink writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_secs() -> u64 {
    crate::retry::DEFAULT_BACKOFF.as_secs()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.backoff_secs))
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for harvested CSV files.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Directory for checkpoints and the error log.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub steam: SteamOptions,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_state_dir() -> String {
    "logs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
            limits: LimitsConfig::default(),
            retry: RetryConfig::default(),
            browser: BrowserEngineConfig::default(),
            steam: SteamOptions::default(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults when no file is found or it fails to parse.
    pub async fn load() -> Self {
        match prefer::load("comment-harvest").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("{}; using defaults", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory relative paths are resolved against: the config file's
    /// directory, or the working directory.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Expand `~` and resolve relative paths against [`Config::base_dir`].
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve_path(&self.output_dir)
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve_path(&self.state_dir)
    }
}

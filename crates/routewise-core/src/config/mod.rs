//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::routing::{CircuitBreakerConfig, MAX_RESET_TIMEOUT_MS, OptimizerConfig};

/// Routewise configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub circuit_breaker: CircuitBreakerConfig,
    pub optimizer: OptimizerConfig,
    pub engine: EngineConfig,
    pub tracker: TrackerConfig,
}

/// Orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default for requests that don't say otherwise
    pub exploration_enabled: bool,
    /// Recorded outcomes between exploration rate adjustments (0 = never)
    pub exploration_adjust_interval: u64,
    /// Extra candidates tried when the selected one fails
    pub max_failover_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exploration_enabled: true,
            exploration_adjust_interval: 100,
            max_failover_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Response time that counts as meeting the SLA
    pub sla_threshold_ms: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sla_threshold_ms: 2000.0,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ROUTEWISE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("routewise")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create config directory: {}", dir.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.circuit_breaker.reset_timeout_ms > MAX_RESET_TIMEOUT_MS {
            return Err(anyhow!(
                "circuit_breaker.reset_timeout_ms must be at most {}, got {}",
                MAX_RESET_TIMEOUT_MS,
                self.circuit_breaker.reset_timeout_ms
            ));
        }
        let rate = self.optimizer.initial_exploration_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(anyhow!(
                "optimizer.initial_exploration_rate must be between 0.0 and 1.0, got {}",
                rate
            ));
        }
        let learning_rate = self.optimizer.learning_rate;
        if !(learning_rate > 0.0 && learning_rate <= 1.0) {
            return Err(anyhow!(
                "optimizer.learning_rate must be in (0.0, 1.0], got {}",
                learning_rate
            ));
        }
        if !(self.tracker.sla_threshold_ms.is_finite() && self.tracker.sla_threshold_ms > 0.0) {
            return Err(anyhow!("tracker.sla_threshold_ms must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Circuit breaker settings
            "circuit_breaker.failure_threshold" => {
                Ok(self.circuit_breaker.failure_threshold.to_string())
            }
            "circuit_breaker.reset_timeout_ms" => {
                Ok(self.circuit_breaker.reset_timeout_ms.to_string())
            }
            "circuit_breaker.successes_to_close" => {
                Ok(self.circuit_breaker.successes_to_close.to_string())
            }
            "circuit_breaker.single_trial" => Ok(self.circuit_breaker.single_trial.to_string()),

            // Optimizer settings
            "optimizer.initial_exploration_rate" => {
                Ok(self.optimizer.initial_exploration_rate.to_string())
            }
            "optimizer.learning_rate" => Ok(self.optimizer.learning_rate.to_string()),

            // Engine settings
            "engine.exploration_enabled" => Ok(self.engine.exploration_enabled.to_string()),
            "engine.exploration_adjust_interval" => {
                Ok(self.engine.exploration_adjust_interval.to_string())
            }
            "engine.max_failover_attempts" => Ok(self.engine.max_failover_attempts.to_string()),

            // Tracker settings
            "tracker.sla_threshold_ms" => Ok(self.tracker.sla_threshold_ms.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `routewise config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "circuit_breaker.failure_threshold" => {
                let threshold: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid failure_threshold value: {}", value))?;
                if threshold == 0 {
                    return Err(anyhow!("Failure threshold must be at least 1"));
                }
                self.circuit_breaker.failure_threshold = threshold;
            }
            "circuit_breaker.reset_timeout_ms" => {
                let timeout: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid reset_timeout_ms value: {}", value))?;
                if timeout == 0 {
                    return Err(anyhow!("Reset timeout must be at least 1ms"));
                }
                if timeout > MAX_RESET_TIMEOUT_MS {
                    return Err(anyhow!(
                        "Reset timeout must be at most {}ms",
                        MAX_RESET_TIMEOUT_MS
                    ));
                }
                self.circuit_breaker.reset_timeout_ms = timeout;
            }
            "circuit_breaker.successes_to_close" => {
                let successes: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid successes_to_close value: {}", value))?;
                if successes == 0 {
                    return Err(anyhow!("Successes to close must be at least 1"));
                }
                self.circuit_breaker.successes_to_close = successes;
            }
            "circuit_breaker.single_trial" => {
                self.circuit_breaker.single_trial = value
                    .parse()
                    .with_context(|| format!("Invalid single_trial value: {}", value))?;
            }

            "optimizer.initial_exploration_rate" => {
                let rate: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid initial_exploration_rate value: {}", value))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(anyhow!("Exploration rate must be between 0.0 and 1.0"));
                }
                self.optimizer.initial_exploration_rate = rate;
            }
            "optimizer.learning_rate" => {
                let rate: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid learning_rate value: {}", value))?;
                if !(rate > 0.0 && rate <= 1.0) {
                    return Err(anyhow!("Learning rate must be greater than 0.0 and at most 1.0"));
                }
                self.optimizer.learning_rate = rate;
            }

            "engine.exploration_enabled" => {
                self.engine.exploration_enabled = value
                    .parse()
                    .with_context(|| format!("Invalid exploration_enabled value: {}", value))?;
            }
            "engine.exploration_adjust_interval" => {
                self.engine.exploration_adjust_interval = value.parse().with_context(|| {
                    format!("Invalid exploration_adjust_interval value: {}", value)
                })?;
            }
            "engine.max_failover_attempts" => {
                self.engine.max_failover_attempts = value
                    .parse()
                    .with_context(|| format!("Invalid max_failover_attempts value: {}", value))?;
            }

            "tracker.sla_threshold_ms" => {
                let threshold: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid sla_threshold_ms value: {}", value))?;
                if !(threshold.is_finite() && threshold > 0.0) {
                    return Err(anyhow!("SLA threshold must be positive"));
                }
                self.tracker.sla_threshold_ms = threshold;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `routewise config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "circuit_breaker.failure_threshold",
            "circuit_breaker.reset_timeout_ms",
            "circuit_breaker.successes_to_close",
            "circuit_breaker.single_trial",
            "optimizer.initial_exploration_rate",
            "optimizer.learning_rate",
            "engine.exploration_enabled",
            "engine.exploration_adjust_interval",
            "engine.max_failover_attempts",
            "tracker.sla_threshold_ms",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

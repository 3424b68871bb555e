//! Configuration loading and the run policy
//!
//! Two layers: `Config` is the on-disk TOML file plus environment variable
//! overrides; `Policy` is the validated, immutable form the decision
//! engine consumes for one run. Environment variables take precedence over
//! the file so a scheduler can reconfigure a deployed binary without
//! shipping a new config.
//!
//! Recognized environment variables: `ENVIRONMENT_TAG`, `CPU_THRESHOLD`,
//! `AGE_THRESHOLD_DAYS`.

use crate::error::{ConfigError, ReapError};
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub policy: PolicyConfig,
    pub aws: Option<AwsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Value of the `Environment` tag that scopes the run
    pub environment_tag: String,
    /// Mean CPU percentage below which an instance counts as idle
    pub cpu_threshold_percent: f64,
    /// Instances younger than this are never evaluated or terminated
    pub age_threshold_days: i64,
    /// Metric sample bucket width in seconds (one sample per bucket)
    pub sample_period_secs: i64,
    /// Deadline for a single provider call
    pub provider_timeout_secs: u64,
    /// Bound on concurrent metric fetches
    pub metric_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: PolicyConfig {
                environment_tag: "Dev".to_string(),
                cpu_threshold_percent: 5.0,
                age_threshold_days: 7,
                sample_period_secs: 86_400, // one sample per day
                provider_timeout_secs: 30,
                metric_concurrency: 4,
            },
            aws: Some(AwsConfig { region: None }),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p.to_path_buf()
        } else {
            // Try .reapctl.toml in current dir, then ~/.config/reapctl/config.toml
            let local = PathBuf::from(".reapctl.toml");
            if local.exists() {
                local
            } else {
                dirs::config_dir()
                    .map(|d| d.join("reapctl").join("config.toml"))
                    .unwrap_or_else(|| PathBuf::from(".reapctl.toml"))
            }
        };

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config: {}", config_path.display()))?
        } else {
            if path.is_some() {
                eprintln!("WARNING: Config file not found: {}", config_path.display());
                eprintln!("   Using default configuration. Run 'reapctl init' to create one.");
            }
            Config::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of file values
    ///
    /// Takes a lookup closure instead of reading the process environment
    /// directly so tests stay deterministic under parallel execution.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tag) = lookup("ENVIRONMENT_TAG") {
            self.policy.environment_tag = tag;
        }
        if let Some(raw) = lookup("CPU_THRESHOLD") {
            self.policy.cpu_threshold_percent = raw.parse().with_context(|| {
                format!("CPU_THRESHOLD must be a number, got '{}'", raw)
            })?;
        }
        if let Some(raw) = lookup("AGE_THRESHOLD_DAYS") {
            self.policy.age_threshold_days = raw.parse().with_context(|| {
                format!("AGE_THRESHOLD_DAYS must be an integer, got '{}'", raw)
            })?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

pub fn init_config(output: &Path) -> Result<()> {
    let config = Config::default();
    config.save(output)?;
    println!("Created config file: {}", output.display());
    Ok(())
}

/// Validated, immutable policy for one evaluation run
///
/// The metrics lookback window always equals the age threshold: an
/// instance is only ever evaluated over CPU history it has had time to
/// accumulate, so a separate window knob would either be redundant or a
/// footgun.
#[derive(Debug, Clone)]
pub struct Policy {
    pub environment_tag: String,
    pub cpu_threshold_percent: f64,
    pub age_threshold: Duration,
    pub sample_period: Duration,
    pub provider_timeout: std::time::Duration,
    pub metric_concurrency: usize,
}

impl Policy {
    pub fn from_config(config: &PolicyConfig) -> crate::error::Result<Self> {
        if !(0.0..=100.0).contains(&config.cpu_threshold_percent) {
            return Err(invalid(
                "cpu_threshold_percent",
                "must be between 0 and 100",
            ));
        }
        if config.age_threshold_days < 1 {
            return Err(invalid("age_threshold_days", "must be at least 1"));
        }
        if config.sample_period_secs < 60 {
            return Err(invalid("sample_period_secs", "must be at least 60"));
        }
        let age_threshold = Duration::days(config.age_threshold_days);
        let sample_period = Duration::seconds(config.sample_period_secs);
        if sample_period > age_threshold {
            return Err(invalid(
                "sample_period_secs",
                "must not exceed the age threshold window",
            ));
        }
        if config.metric_concurrency == 0 {
            return Err(invalid("metric_concurrency", "must be at least 1"));
        }
        if config.environment_tag.is_empty() {
            return Err(ReapError::Config(ConfigError::MissingField(
                "environment_tag".to_string(),
            )));
        }
        Ok(Self {
            environment_tag: config.environment_tag.clone(),
            cpu_threshold_percent: config.cpu_threshold_percent,
            age_threshold,
            sample_period,
            provider_timeout: std::time::Duration::from_secs(config.provider_timeout_secs),
            metric_concurrency: config.metric_concurrency,
        })
    }

    /// Lookback window for the utilization query (equal to the age threshold)
    pub fn sampling_window(&self) -> Duration {
        self.age_threshold
    }
}

fn invalid(field: &str, reason: &str) -> ReapError {
    ReapError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    })
}

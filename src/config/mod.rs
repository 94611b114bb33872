//! Configuration management for perfwatch
//!
//! This module provides the tunable thresholds and intervals for every
//! telemetry component:
//! - TOML file loading and saving
//! - Environment variable overrides
//! - Runtime validation

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub cache: CacheConfig,
    pub suggestions: SuggestionConfig,
    pub probes: ProbeConfig,
    pub device: DeviceConfig,
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
}

/// Memory monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Usage percentage above which the monitor enters low-memory mode
    pub low_memory_threshold_percent: f64,
    /// Interval used by the background sampler
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            low_memory_threshold_percent: 80.0,
            sample_interval: Duration::from_secs(2),
        }
    }
}

/// Instrumented cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 256,
        }
    }
}

/// Thresholds for optimization suggestions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Memory usage percentage above which low-memory behaviors are suggested
    pub high_memory_percent: f64,
    /// Hit rate strictly below which cache tuning is suggested
    pub low_hit_rate: f64,
    /// Minimum number of cache requests before the hit rate is trusted
    pub min_cache_requests: u64,
    /// Expired-but-resident items at which an eviction review is suggested
    pub min_expired_items: u64,
    /// Overall probe score strictly below which visual features are questioned
    pub min_overall_score: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            high_memory_percent: 80.0,
            low_hit_rate: 0.8,
            min_cache_requests: 20,
            min_expired_items: 1,
            min_overall_score: 80.0,
        }
    }
}

/// Performance probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Watchdog for a single probe; `None` lets a probe run as long as it needs
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Option<Duration>,
    /// Wall-clock budget a built-in probe must finish within to succeed
    #[serde(with = "humantime_serde")]
    pub per_probe_budget: Duration,
    pub memory_allocation_mb: usize,
    pub hashing_rounds: u32,
    pub cache_operations: usize,
    pub serialization_records: usize,
    pub compression_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_timeout: None,
            per_probe_budget: Duration::from_secs(5),
            memory_allocation_mb: 16,
            hashing_rounds: 20_000,
            cache_operations: 5_000,
            serialization_records: 2_000,
            compression_bytes: 1024 * 1024,
        }
    }
}

/// Device tier boundaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Devices with at most this much memory are low tier
    pub low_tier_max_memory_gb: f64,
    /// Devices with at most this much memory (and above low tier) are mid tier
    pub mid_tier_max_memory_gb: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            low_tier_max_memory_gb: 3.0,
            mid_tier_max_memory_gb: 6.0,
        }
    }
}

/// Snapshot polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from `PERFWATCH_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let mut config = match env::var("PERFWATCH_CONFIG") {
            Ok(path) => Self::load_from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        config.override_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Override configuration with environment variables
    fn override_from_env(&mut self) -> Result<()> {
        if let Ok(val) = env::var("PERFWATCH_LOW_MEMORY_THRESHOLD") {
            self.memory.low_memory_threshold_percent = val
                .parse()
                .map_err(|_| Error::Config("Invalid low memory threshold".to_string()))?;
        }

        if let Ok(val) = env::var("PERFWATCH_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = env::var("PERFWATCH_PROBE_TIMEOUT_SECS") {
            let secs: u64 = val
                .parse()
                .map_err(|_| Error::Config("Invalid probe timeout".to_string()))?;
            self.probes.probe_timeout = Some(Duration::from_secs(secs));
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let percent = |v: f64| (0.0..=100.0).contains(&v);

        if !percent(self.memory.low_memory_threshold_percent) {
            return Err(Error::Config(
                "Low memory threshold must be between 0 and 100".to_string(),
            ));
        }

        if self.memory.sample_interval.is_zero() {
            return Err(Error::Config("Sample interval must be > 0".to_string()));
        }

        if self.cache.max_entries == 0 {
            return Err(Error::Config("Cache max entries must be > 0".to_string()));
        }

        if !percent(self.suggestions.high_memory_percent)
            || !percent(self.suggestions.min_overall_score)
        {
            return Err(Error::Config(
                "Suggestion percentages must be between 0 and 100".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.suggestions.low_hit_rate) {
            return Err(Error::Config(
                "Low hit rate must be between 0.0 and 1.0".to_string(),
            ));
        }

        if matches!(self.probes.probe_timeout, Some(t) if t.is_zero()) {
            return Err(Error::Config("Probe timeout must be > 0 when set".to_string()));
        }

        if self.device.low_tier_max_memory_gb <= 0.0
            || self.device.mid_tier_max_memory_gb <= self.device.low_tier_max_memory_gb
        {
            return Err(Error::Config(
                "Device tier bounds must be positive and increasing".to_string(),
            ));
        }

        if self.broker.poll_interval.is_zero() {
            return Err(Error::Config("Poll interval must be > 0".to_string()));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;

        fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}

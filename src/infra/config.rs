//! Configuration loading from TOML files
//!
//! Every section is optional; missing files fall back to defaults with a
//! warning so the demo binary always starts.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Battery percentage at or below which a low-battery alert fires
    #[serde(default = "default_battery_threshold_pct")]
    pub battery_threshold_pct: u8,
    /// Cooldown between low-battery alerts for one subject
    #[serde(default = "default_low_battery_cooldown_secs")]
    pub low_battery_cooldown_secs: u64,
    /// Cooldown between entry/exit alerts per (subject, fence)
    #[serde(default = "default_fence_cooldown_secs")]
    pub fence_cooldown_secs: u64,
}

fn default_battery_threshold_pct() -> u8 {
    20
}

fn default_low_battery_cooldown_secs() -> u64 {
    900
}

fn default_fence_cooldown_secs() -> u64 {
    300
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            battery_threshold_pct: default_battery_threshold_pct(),
            low_battery_cooldown_secs: default_low_battery_cooldown_secs(),
            fence_cooldown_secs: default_fence_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FencesConfig {
    #[serde(default = "default_min_radius_m")]
    pub min_radius_m: f64,
    #[serde(default = "default_max_radius_m")]
    pub max_radius_m: f64,
}

fn default_min_radius_m() -> f64 {
    50.0
}

fn default_max_radius_m() -> f64 {
    5000.0
}

impl Default for FencesConfig {
    fn default() -> Self {
        Self { min_radius_m: default_min_radius_m(), max_radius_m: default_max_radius_m() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Hard deadline for one push delivery attempt
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
    /// Backoff before the single append retry
    #[serde(default = "default_append_retry_delay_ms")]
    pub append_retry_delay_ms: u64,
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

fn default_append_retry_delay_ms() -> u64 {
    250
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delivery_timeout_secs(),
            append_retry_delay_ms: default_append_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub fences: FencesConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    battery_threshold_pct: u8,
    low_battery_cooldown: Duration,
    fence_cooldown: Duration,
    min_radius_m: f64,
    max_radius_m: f64,
    delivery_timeout: Duration,
    append_retry_delay: Duration,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        Self {
            battery_threshold_pct: toml_config.alerts.battery_threshold_pct,
            low_battery_cooldown: Duration::from_secs(
                toml_config.alerts.low_battery_cooldown_secs,
            ),
            fence_cooldown: Duration::from_secs(toml_config.alerts.fence_cooldown_secs),
            min_radius_m: toml_config.fences.min_radius_m,
            max_radius_m: toml_config.fences.max_radius_m,
            delivery_timeout: Duration::from_secs(toml_config.delivery.timeout_secs),
            append_retry_delay: Duration::from_millis(
                toml_config.delivery.append_retry_delay_ms,
            ),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: source.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn battery_threshold_pct(&self) -> u8 {
        self.battery_threshold_pct
    }

    pub fn low_battery_cooldown(&self) -> Duration {
        self.low_battery_cooldown
    }

    pub fn fence_cooldown(&self) -> Duration {
        self.fence_cooldown
    }

    pub fn min_radius_m(&self) -> f64 {
        self.min_radius_m
    }

    pub fn max_radius_m(&self) -> f64 {
        self.max_radius_m
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    pub fn append_retry_delay(&self) -> Duration {
        self.append_retry_delay
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shrink the fence cooldown
    #[cfg(test)]
    pub fn with_fence_cooldown(mut self, cooldown: Duration) -> Self {
        self.fence_cooldown = cooldown;
        self
    }

    /// Builder method for tests to set the battery threshold
    #[cfg(test)]
    pub fn with_battery_threshold(mut self, pct: u8) -> Self {
        self.battery_threshold_pct = pct;
        self
    }
}

//! Configuration management for RoboVac Bridge
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tokio::fs;

pub use watcher::{ConfigWatcher, Reload};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    /// Accessory display name
    #[serde(default = "default_name")]
    pub name: String,
    pub device_id: String,
    pub local_key: String,
    /// Fixed device address; empty or absent means discover on the LAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ip: Option<String>,
    #[serde(default = "default_cache_duration_ms")]
    pub cache_duration_ms: u64,
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,
    /// Expose the vacuum as a Switch instead of a Fan
    #[serde(default)]
    pub use_switch_service: bool,
    #[serde(default)]
    pub hide_find_button: bool,
    #[serde(default)]
    pub hide_error_sensor: bool,
    /// Battery percentage below which the low-battery flag is raised
    #[serde(default = "default_low_battery_threshold")]
    pub low_battery_threshold: u8,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Built-in simulated device settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SimulatorConfig {
    #[serde(default = "default_sim_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_sim_battery")]
    pub initial_battery: u8,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_sim_latency_ms(),
            initial_battery: default_sim_battery(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            anyhow::bail!("device_id cannot be empty");
        }
        if self.local_key.trim().is_empty() {
            anyhow::bail!("local_key cannot be empty");
        }
        if self.cache_duration_ms == 0 {
            anyhow::bail!("cache_duration_ms must be greater than zero");
        }
        if self.callback_timeout_ms == 0 {
            anyhow::bail!("callback_timeout_ms must be greater than zero");
        }
        if self.low_battery_threshold > 100 {
            anyhow::bail!(
                "low_battery_threshold {} is invalid (must be 0-100)",
                self.low_battery_threshold
            );
        }
        if self.simulator.initial_battery > 100 {
            anyhow::bail!(
                "simulator.initial_battery {} is invalid (must be 0-100)",
                self.simulator.initial_battery
            );
        }

        if let Some(ip) = self.fixed_address() {
            ip.parse::<IpAddr>()
                .with_context(|| format!("device_ip '{}' is not a valid IP address", ip))?;
        }

        Ok(())
    }

    /// Configured address, treating an empty string as absent
    pub fn fixed_address(&self) -> Option<String> {
        self.device_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    /// Starter config written when no file exists yet
    pub fn example() -> Self {
        Self {
            name: default_name(),
            device_id: "your-device-id".to_string(),
            local_key: "your-local-key".to_string(),
            device_ip: None,
            cache_duration_ms: default_cache_duration_ms(),
            callback_timeout_ms: default_callback_timeout_ms(),
            use_switch_service: false,
            hide_find_button: false,
            hide_error_sensor: false,
            low_battery_threshold: default_low_battery_threshold(),
            simulator: SimulatorConfig::default(),
        }
    }
}

// Default value functions
fn default_name() -> String { "RoboVac".to_string() }
fn default_cache_duration_ms() -> u64 { 15_000 }
fn default_callback_timeout_ms() -> u64 { 3_000 }
fn default_low_battery_threshold() -> u8 { 30 }
fn default_sim_latency_ms() -> u64 { 50 }
fn default_sim_battery() -> u8 { 100 }

//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: If a `.portable` marker file exists next to the
//!   executable, the config file and logs live in the same directory.
//! - **Installed mode** (default): Data is stored in the platform data
//!   directory under `RoboVac Bridge` (`~/.local/share` on Linux,
//!   `%APPDATA%` on Windows).

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Application name used for directories in installed mode
const APP_NAME: &str = "RoboVac Bridge";

const CONFIG_FILE: &str = "config.yaml";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Note: This is called before logging is initialized.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        eprintln!("[paths] Executable directory: {}", exe_dir.display());

        Self::resolve(&exe_dir, dirs::data_dir())
    }

    /// Resolve paths for a given executable directory and platform data dir
    pub fn resolve(exe_dir: &Path, data_dir: Option<PathBuf>) -> Self {
        if exe_dir.join(".portable").exists() {
            return Self {
                config: exe_dir.join(CONFIG_FILE),
                logs_dir: exe_dir.join("logs"),
                is_portable: true,
            };
        }

        let app_data = data_dir
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform data dir, falling back to exe dir");
                exe_dir.to_path_buf()
            })
            .join(APP_NAME);

        Self {
            config: app_data.join(CONFIG_FILE),
            logs_dir: app_data.join("logs"),
            is_portable: false,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure the logs and config directories exist.
    ///
    /// Writes a starter config if none exists yet.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }

        let base_dir = self.base_dir();
        if !base_dir.exists() {
            debug!("Creating config directory: {}", base_dir.display());
            std::fs::create_dir_all(&base_dir)?;
        }

        if !self.config.exists() {
            self.write_example_config()?;
        }

        Ok(())
    }

    fn write_example_config(&self) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(&AppConfig::example())
            .context("Failed to serialize example config")?;
        std::fs::write(&self.config, yaml).with_context(|| {
            format!("Failed to write example config to {}", self.config.display())
        })?;
        info!(
            "No config found, wrote a starter config to {} (fill in device_id and local_key)",
            self.config.display()
        );
        Ok(())
    }
}

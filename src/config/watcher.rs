//! Hot reload of the configuration file
//!
//! File events only nudge a channel; the reload itself (debounce, parse,
//! diff against the running config) happens on the async side.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;
use crate::device::RoboVac;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// A config change that differs from the running one
#[derive(Debug, Clone, PartialEq)]
pub struct Reload {
    pub config: AppConfig,
    /// Changed settings that only take effect after a restart
    pub restart_required: Vec<&'static str>,
}

impl Reload {
    /// `None` when nothing changed
    pub fn between(current: &AppConfig, new_config: &AppConfig) -> Option<Self> {
        if current == new_config {
            return None;
        }

        let mut restart_required = Vec::new();
        let mut check = |field: &'static str, changed: bool| {
            if changed {
                restart_required.push(field);
            }
        };
        check("name", current.name != new_config.name);
        check("device_id", current.device_id != new_config.device_id);
        check("local_key", current.local_key != new_config.local_key);
        check("device_ip", current.fixed_address() != new_config.fixed_address());
        check("use_switch_service", current.use_switch_service != new_config.use_switch_service);
        check("hide_find_button", current.hide_find_button != new_config.hide_find_button);
        check("hide_error_sensor", current.hide_error_sensor != new_config.hide_error_sensor);
        check(
            "low_battery_threshold",
            current.low_battery_threshold != new_config.low_battery_threshold,
        );
        check("simulator", current.simulator != new_config.simulator);

        Some(Self {
            config: new_config.clone(),
            restart_required,
        })
    }

    /// Push the live settings into `vac`
    pub fn apply(&self, vac: &RoboVac) {
        vac.update_timing(self.config.cache_duration(), self.config.callback_timeout());
        info!(
            device = %vac.name(),
            cache_duration_ms = self.config.cache_duration_ms,
            callback_timeout_ms = self.config.callback_timeout_ms,
            "Applied cache and deadline settings"
        );
        if !self.restart_required.is_empty() {
            warn!(
                "Changes to {} take effect only after a restart",
                self.restart_required.join(", ")
            );
        }
    }
}

/// Watches the config file and yields reloads against the running config
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: String,
    changes: mpsc::Receiver<()>,
    current: AppConfig,
}

impl ConfigWatcher {
    pub async fn new(config_path: String) -> Result<Self> {
        let current = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // Capacity 1: a burst of file events collapses into one pending reload
        let (tx, changes) = mpsc::channel(1);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                debug!("Config file changed: {:?}", event.paths);
                let _ = tx.try_send(());
            },
            Ok(_) => {},
            Err(e) => error!("Watch error: {}", e),
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;
        info!("Config file watcher started for: {}", config_path);

        Ok(Self {
            _watcher: watcher,
            path: config_path,
            changes,
            current,
        })
    }

    /// Config currently in effect
    pub fn current(&self) -> &AppConfig {
        &self.current
    }

    /// Wait for the file to change into something new and valid
    ///
    /// Unparseable or unchanged files are skipped. Returns `None` once the
    /// watcher has shut down.
    pub async fn next_reload(&mut self) -> Option<Reload> {
        loop {
            self.changes.recv().await?;
            tokio::time::sleep(DEBOUNCE).await;
            while self.changes.try_recv().is_ok() {}

            let new_config = match AppConfig::load(&self.path).await {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to reload config (keeping old config): {:#}", e);
                    continue;
                },
            };

            match Reload::between(&self.current, &new_config) {
                Some(reload) => {
                    info!("📝 Configuration file changed, reloading...");
                    self.current = new_config;
                    return Some(reload);
                },
                None => debug!("Config file touched without changes"),
            }
        }
    }

    /// Apply every reload to `vac` until the watcher shuts down
    pub async fn drive(mut self, vac: RoboVac) {
        while let Some(reload) = self.next_reload().await {
            reload.apply(&vac);
        }
    }
}

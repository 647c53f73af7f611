//! Application state management
//! This module wires the sensor-state sink to the monitor handle for the
//! binary and for embedders that want the same setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::config::MonitorConfig;
use crate::core::bluetooth::BluestBackend;
use crate::core::{HeartRateMonitor, HrmMonitor};

/// Environment variable naming the config file when no path is given
pub const CONFIG_ENV_VAR: &str = "HRM_BRIDGE_CONFIG";

/// Config file used when neither an argument nor the environment names one
pub const DEFAULT_CONFIG_FILE: &str = "hrm_bridge.json";

/// Resolves the config path from an explicit argument, then the environment.
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Global application state
pub struct AppState {
    /// Latest readings from the connected monitor
    pub heart_rate: Arc<HeartRateMonitor>,
    /// The monitor loop handle
    pub monitor: HrmMonitor,
    pub config: MonitorConfig,
}

impl AppState {
    /// Loads the config at `config_path` and builds a stopped monitor.
    pub async fn new(config_path: &Path) -> Result<Self> {
        let config = MonitorConfig::load_config(config_path).await?;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: MonitorConfig) -> Self {
        let heart_rate = Arc::new(HeartRateMonitor::new());
        let monitor = HrmMonitor::new(config.clone(), heart_rate.clone());
        Self {
            heart_rate,
            monitor,
            config,
        }
    }

    /// Starts the monitor against the system Bluetooth adapter.
    pub fn start_bluetooth(&self) -> Result<()> {
        let connect_timeout = self.config.connect_timeout();
        info!("Starting BLE Heart Rate Monitor on the system adapter...");
        self.monitor.start(move || BluestBackend::new(connect_timeout))
    }

    /// Stops the monitor and waits for its thread to exit.
    pub fn shutdown(&self) -> Result<()> {
        self.monitor.stop();
        self.monitor.join()
    }
}

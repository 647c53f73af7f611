use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    DEFAULT_BONUS_SCAN_WINDOW_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INITIAL_RECHECK_INTERVAL_SECS,
    DEFAULT_INITIAL_SCAN_TIMEOUT_SECS, DEFAULT_LOW_FREQ_POLL_DELAY_SECS, DEFAULT_MAX_RECHECK_INTERVAL_SECS,
    DEFAULT_PER_EVENT_TIMEOUT_MS, DEFAULT_RECHECK_DURATION_SECS, DEFAULT_RSSI_THRESHOLD,
    DEFAULT_SUPERVISION_INTERVAL_MS,
};
use crate::error::ConfigError;
use crate::utils::ensure_directory_exists;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum signal strength (dB) for a monitor to be considered.
    pub rssi_threshold: i16,

    /// Length of the first scan after startup.
    pub initial_scan_timeout_secs: u64,

    /// Extra time spent looking for stronger monitors once one is found.
    pub bonus_scan_window_secs: u64,

    /// Length of every later scan.
    pub recheck_duration_secs: u64,

    /// First delay between scan cycles; doubled on every failed cycle.
    pub initial_recheck_interval_secs: u64,

    /// Cap on the delay between scan cycles.
    pub max_recheck_interval_secs: u64,

    /// Delay between battery polls while connected.
    pub low_freq_poll_delay_secs: u64,

    /// Upper bound on waiting for a single advertisement.
    pub per_event_timeout_ms: u64,

    /// How often a live connection is checked.
    pub supervision_interval_ms: u64,

    /// Hard timeout on the physical connect.
    pub connect_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            rssi_threshold: DEFAULT_RSSI_THRESHOLD,
            initial_scan_timeout_secs: DEFAULT_INITIAL_SCAN_TIMEOUT_SECS,
            bonus_scan_window_secs: DEFAULT_BONUS_SCAN_WINDOW_SECS,
            recheck_duration_secs: DEFAULT_RECHECK_DURATION_SECS,
            initial_recheck_interval_secs: DEFAULT_INITIAL_RECHECK_INTERVAL_SECS,
            max_recheck_interval_secs: DEFAULT_MAX_RECHECK_INTERVAL_SECS,
            low_freq_poll_delay_secs: DEFAULT_LOW_FREQ_POLL_DELAY_SECS,
            per_event_timeout_ms: DEFAULT_PER_EVENT_TIMEOUT_MS,
            supervision_interval_ms: DEFAULT_SUPERVISION_INTERVAL_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl MonitorConfig {
    pub fn initial_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_scan_timeout_secs)
    }

    pub fn bonus_scan_window(&self) -> Duration {
        Duration::from_secs(self.bonus_scan_window_secs)
    }

    pub fn recheck_duration(&self) -> Duration {
        Duration::from_secs(self.recheck_duration_secs)
    }

    pub fn initial_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.initial_recheck_interval_secs)
    }

    pub fn max_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.max_recheck_interval_secs)
    }

    pub fn low_freq_poll_delay(&self) -> Duration {
        Duration::from_secs(self.low_freq_poll_delay_secs)
    }

    pub fn per_event_timeout(&self) -> Duration {
        Duration::from_millis(self.per_event_timeout_ms)
    }

    pub fn supervision_interval(&self) -> Duration {
        Duration::from_millis(self.supervision_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Checks the values the monitor loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("initial_scan_timeout_secs", self.initial_scan_timeout_secs),
            ("recheck_duration_secs", self.recheck_duration_secs),
            ("initial_recheck_interval_secs", self.initial_recheck_interval_secs),
            ("low_freq_poll_delay_secs", self.low_freq_poll_delay_secs),
            ("per_event_timeout_ms", self.per_event_timeout_ms),
            ("supervision_interval_ms", self.supervision_interval_ms),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if self.max_recheck_interval_secs < self.initial_recheck_interval_secs {
            return Err(ConfigError::BackoffCap {
                initial: self.initial_recheck_interval_secs,
                max: self.max_recheck_interval_secs,
            });
        }
        if self.rssi_threshold > 0 {
            return Err(ConfigError::PositiveRssi(self.rssi_threshold));
        }
        Ok(())
    }

    /// Loads the config from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        config.validate()?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config as pretty JSON, creating the parent directory.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            ensure_directory_exists(config_dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize monitor config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Monitor config saved to {:?}.", file_path);
        Ok(())
    }
}

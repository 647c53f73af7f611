use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};

use anyhow::Result;
use log::{error, info};
use regex::Regex;
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn mac_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").ok())
        .as_ref()
}

/// Extracts a MAC address from a platform device id such as
/// `hci0/dev_AA_BB_CC_DD_EE_FF`.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    mac_pattern()?
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}

/// Address published for a device: its MAC when the id contains one,
/// otherwise the platform id itself (e.g. a UUID on macOS).
pub fn display_address(device_id: &str) -> String {
    extract_mac_address(device_id).unwrap_or_else(|| device_id.to_string())
}

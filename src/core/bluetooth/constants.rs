//! Constants used throughout the heart-rate client
//! This module contains the GATT identifiers of the standard heart-rate
//! profile and the default values of every tunable in [`crate::config`].

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const UUID_BODY_SENSOR_LOCATION: Uuid = Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);
pub const UUID_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
pub const UUID_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const UUID_SERIAL_NUMBER: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);

/// Source tag published to the sensor sink while a monitor is connected
pub const SOURCE_BLUETOOTH: &str = "bluetooth";

/// Minimum signal strength (dB) for a monitor to be eligible for connection
pub const DEFAULT_RSSI_THRESHOLD: i16 = -80;

/// Length of the first scan after startup, in seconds
pub const DEFAULT_INITIAL_SCAN_TIMEOUT_SECS: u64 = 30;

/// Extra time to look for competing monitors once one has been found, in seconds
pub const DEFAULT_BONUS_SCAN_WINDOW_SECS: u64 = 5;

/// Length of every scan after the first one, in seconds
pub const DEFAULT_RECHECK_DURATION_SECS: u64 = 15;

/// First delay between scan cycles, in seconds
pub const DEFAULT_INITIAL_RECHECK_INTERVAL_SECS: u64 = 5;

/// Cap on the delay between scan cycles, in seconds
pub const DEFAULT_MAX_RECHECK_INTERVAL_SECS: u64 = 60;

/// Delay between polls of slowly-changing data such as battery level, in seconds
pub const DEFAULT_LOW_FREQ_POLL_DELAY_SECS: u64 = 30;

/// Upper bound on waiting for one advertisement event, in milliseconds
pub const DEFAULT_PER_EVENT_TIMEOUT_MS: u64 = 1000;

/// Interval at which a live connection is checked, in milliseconds
pub const DEFAULT_SUPERVISION_INTERVAL_MS: u64 = 1000;

/// Hard timeout on the physical connect, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Buffer size of the advertisement and notification channels
pub const CHANNEL_CAPACITY: usize = 64;

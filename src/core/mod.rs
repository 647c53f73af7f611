//! Core functionality for the heart-rate bridge
//! This module contains the BLE client engine and the heart-rate data model.

pub mod bluetooth;
pub mod heart_rate;

// Re-export commonly used types
pub use bluetooth::HrmMonitor;
pub use heart_rate::{ContactStatus, HeartRateMonitor, HeartRateReading, SensorLocation, SensorSink};

//! Defines shared data structures for the Bluetooth module.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use uuid::Uuid;

use crate::utils::lock;

/// One advertisement event as seen by the scan feed
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The advertised local name, if any
    pub name: Option<String>,
    /// Service UUIDs carried by the advertisement
    pub services: Vec<Uuid>,
    /// The signal strength (RSSI) of the device, if the platform reported one
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Returns true if the advertisement carries the given service
    pub fn advertises(&self, service: Uuid) -> bool {
        self.services.iter().any(|uuid| *uuid == service)
    }
}

/// A heart-rate monitor accepted by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The advertised local name, if any
    pub name: Option<String>,
    /// Service UUIDs seen in the latest advertisement
    pub services: Vec<Uuid>,
    /// The latest signal strength (RSSI) of the device
    pub rssi: i16,
}

/// A GATT service and its characteristics, used for diagnostics only
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Lifecycle phase of the monitor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorPhase {
    Stopped = 0,
    ReconcilingAdapter = 1,
    Scanning = 2,
    ConnectingAndMonitoring = 3,
    BackoffSleep = 4,
}

impl MonitorPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ReconcilingAdapter,
            2 => Self::Scanning,
            3 => Self::ConnectingAndMonitoring,
            4 => Self::BackoffSleep,
            _ => Self::Stopped,
        }
    }
}

/// Status of the engine, readable from any thread.
///
/// Each field is synchronized on its own; readers must not assume the
/// fields were captured at the same instant.
#[derive(Debug)]
pub struct MonitorStatus {
    scanning: AtomicBool,
    connected: AtomicBool,
    phase: AtomicU8,
    target_device: Mutex<Option<String>>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            scanning: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            phase: AtomicU8::new(MonitorPhase::Stopped as u8),
            target_device: Mutex::new(None),
        }
    }
}

impl MonitorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> MonitorPhase {
        MonitorPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Identifier of the device currently being connected to or monitored
    pub fn target_device(&self) -> Option<String> {
        lock(&self.target_device).clone()
    }

    pub(crate) fn set_scanning(&self, scanning: bool) {
        self.scanning.store(scanning, Ordering::Release);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn set_phase(&self, phase: MonitorPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn set_target_device(&self, target: Option<String>) {
        *lock(&self.target_device) = target;
    }
}

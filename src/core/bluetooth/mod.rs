//! Bluetooth functionality for the heart-rate bridge
//! This module handles all bluetooth operations including adapter
//! reconciliation, scanning, connecting, and receiving measurements from
//! the heart-rate monitor.

mod adapter;
mod backend;
mod connection;
pub mod constants;
mod host;
mod manager;
mod metadata;
mod notification;
mod poller;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use adapter::{Reconciliation, stop_existing_discovery};
pub use backend::{AdapterControl, AdvertisementFeed, Backend, Central, PeripheralLink};
pub use connection::{ConnectionManager, SessionOutcome};
pub use constants::*; // Re-export all constants
pub use host::{BluestBackend, BluestLink};
pub use manager::{Backoff, HrmMonitor, MonitorLoop};
pub use metadata::{DeviceMetadata, fetch_static_info};
pub use notification::{DecodeWarning, DecodedMeasurement, NotificationHandler, decode_measurement};
pub use poller::{PollerHandle, spawn_poller};
pub use scanner::{Admission, HrmScanner, ScanEnd, ScanSession};
pub use types::{Advertisement, DeviceCandidate, MonitorPhase, MonitorStatus, ServiceInfo};

//! Seams between the engine and the host Bluetooth stack
//! The scanner, the connection session and the poller only talk to the
//! radio through these traits, so the same engine drives the bluest
//! backend in production and scripted peripherals in tests.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use crate::core::bluetooth::types::{Advertisement, DeviceCandidate, ServiceInfo};
use crate::error::AdapterError;

/// Live feed of advertisement events.
///
/// Dropping the feed stops the scan that produces it.
pub struct AdvertisementFeed {
    rx: mpsc::Receiver<Advertisement>,
    _scan_guard: Option<DropGuard>,
}

impl AdvertisementFeed {
    pub fn new(rx: mpsc::Receiver<Advertisement>) -> Self {
        Self { rx, _scan_guard: None }
    }

    /// Creates a feed that cancels its producing scan when dropped
    pub fn with_guard(rx: mpsc::Receiver<Advertisement>, guard: DropGuard) -> Self {
        Self { rx, _scan_guard: Some(guard) }
    }

    /// Waits for the next advertisement. `None` once the scan has ended.
    pub async fn next(&mut self) -> Option<Advertisement> {
        self.rx.recv().await
    }
}

/// Control over the host adapter's discovery state
#[async_trait::async_trait]
pub trait AdapterControl: Send + Sync {
    /// Whether the adapter is currently discovering
    async fn is_discovering(&self) -> Result<bool, AdapterError>;
    /// Ask the adapter to stop discovering
    async fn stop_discovery(&self) -> Result<(), AdapterError>;
}

/// The central role: scanning and opening connections
#[async_trait::async_trait]
pub trait Central: Send + Sync {
    type Link: PeripheralLink + 'static;

    /// Starts a scan and returns its advertisement feed
    async fn advertisements(&self) -> Result<AdvertisementFeed>;

    /// Opens a physical connection to a scanned device.
    ///
    /// A returned link may still report `is_connected() == false` when the
    /// platform accepted the request but the device never came up.
    async fn connect(&self, candidate: &DeviceCandidate) -> Result<Self::Link>;
}

/// One physical connection to a peripheral
#[async_trait::async_trait]
pub trait PeripheralLink: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Services and characteristics exposed by the peripheral
    async fn services(&self) -> Result<Vec<ServiceInfo>>;

    /// Reads the current value of a characteristic
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Subscribes to notifications; every payload is delivered on the receiver
    async fn subscribe(&self, characteristic: Uuid) -> Result<mpsc::Receiver<Vec<u8>>>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Everything the monitor loop needs from a host stack
pub trait Backend: Central + AdapterControl {}

impl<T: Central + AdapterControl> Backend for T {}

//! Bluetooth connection handling for the heart-rate monitor
//! A session owns one physical connection: it subscribes to measurements,
//! supervises the battery poller and always tears both down before the
//! link is released. Retrying is left to the monitor loop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::core::bluetooth::backend::{Central, PeripheralLink};
use crate::core::bluetooth::constants::{SOURCE_BLUETOOTH, UUID_HEART_RATE_MEASUREMENT};
use crate::core::bluetooth::metadata::fetch_static_info;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::poller::{PollerHandle, spawn_poller};
use crate::core::bluetooth::types::{DeviceCandidate, MonitorStatus};
use crate::core::heart_rate::SensorSink;
use crate::error::SessionError;
use crate::utils::display_address;

/// How a session that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The platform reported the device as not connected after connecting
    NotConnected,
    /// Notifications were flowing and the device later went away
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisionEnd {
    Cancelled,
    LinkLost,
    StreamClosed,
}

/// Connection manager for the heart-rate monitor
#[derive(Clone)]
pub struct ConnectionManager {
    sink: Arc<dyn SensorSink>,
    status: Arc<MonitorStatus>,
    cancel_token: CancellationToken,
    supervision_interval: Duration,
    poll_delay: Duration,
}

impl ConnectionManager {
    pub fn new(
        config: &MonitorConfig,
        sink: Arc<dyn SensorSink>,
        status: Arc<MonitorStatus>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            sink,
            status,
            cancel_token,
            supervision_interval: config.supervision_interval(),
            poll_delay: config.low_freq_poll_delay(),
        }
    }

    /// Connects to `device` and streams readings until it disconnects or a
    /// stop is requested.
    pub async fn run<C: Central + ?Sized>(
        &self,
        central: &C,
        device: &DeviceCandidate,
    ) -> Result<SessionOutcome, SessionError> {
        info!(
            "Connecting as client to ble device: {} [{}]...",
            device.name.as_deref().unwrap_or("Unknown"),
            device.id
        );
        let link = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(SessionError::Cancelled),
            link = central.connect(device) => Arc::new(link?),
        };

        if !link.is_connected().await {
            warn!("Failed to connect to BLE HRM.");
            release(&*link).await;
            return Ok(SessionOutcome::NotConnected);
        }

        self.sink.update_address(&display_address(&device.id));
        self.sink.update_source(SOURCE_BLUETOOTH);

        let prepare = async {
            info!("Connected to BLE HRM. Logging GATT services and characteristics...");
            log_services_and_characteristics(&*link).await;

            info!("Connected to BLE HRM. Fetching static BLE data...");
            fetch_static_info(&*link, &*self.sink).await;
        };
        let prepared = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => false,
            _ = prepare => true,
        };
        if !prepared || self.cancel_token.is_cancelled() {
            release(&*link).await;
            return Err(SessionError::Cancelled);
        }

        info!("Subscribing to heart rate notifications from BLE HRM...");
        let notifications = match link.subscribe(UUID_HEART_RATE_MEASUREMENT).await {
            Ok(notifications) => notifications,
            Err(e) => {
                release(&*link).await;
                return Err(e.into());
            }
        };
        self.status.set_connected(true);

        let session_token = self.cancel_token.child_token();
        let dispatcher = NotificationHandler::new(self.sink.clone()).spawn(notifications, session_token.child_token());
        let poller = spawn_poller(link.clone(), self.sink.clone(), self.poll_delay, session_token.child_token());

        let end = self.supervise(&*link, &dispatcher).await;
        self.teardown(&*link, poller, dispatcher, session_token).await;

        if end == SupervisionEnd::Cancelled || self.cancel_token.is_cancelled() {
            warn!("BLE HRM connection task was cancelled.");
            return Err(SessionError::Cancelled);
        }
        if end == SupervisionEnd::StreamClosed {
            warn!("Heart rate notification stream closed while the link was up.");
        }
        warn!("Disconnected from HRM.");
        Ok(SessionOutcome::Disconnected)
    }

    /// Blocks while the link is up, checking it every supervision interval.
    async fn supervise<L: PeripheralLink + ?Sized>(&self, link: &L, dispatcher: &JoinHandle<()>) -> SupervisionEnd {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => return SupervisionEnd::Cancelled,
                _ = tokio::time::sleep(self.supervision_interval) => {}
            }
            if !link.is_connected().await {
                return SupervisionEnd::LinkLost;
            }
            if dispatcher.is_finished() {
                return SupervisionEnd::StreamClosed;
            }
        }
    }

    /// Runs on every exit path once notifications were subscribed.
    async fn teardown<L: PeripheralLink + ?Sized>(
        &self,
        link: &L,
        poller: PollerHandle,
        dispatcher: JoinHandle<()>,
        session_token: CancellationToken,
    ) {
        if let Err(e) = link.unsubscribe(UUID_HEART_RATE_MEASUREMENT).await {
            warn!("Failed to stop HRM notifications cleanly: {}", e);
        }

        poller.shutdown().await;

        session_token.cancel();
        if let Err(e) = dispatcher.await {
            error!("Notification task finished with an unexpected join error: {:?}", e);
        }

        release(link).await;
        self.status.set_connected(false);
        debug!("Connection session torn down.");
    }
}

async fn release<L: PeripheralLink + ?Sized>(link: &L) {
    if let Err(e) = link.disconnect().await {
        warn!("Failed to disconnect from HRM cleanly: {}", e);
    }
}

async fn log_services_and_characteristics<L: PeripheralLink + ?Sized>(link: &L) {
    match link.services().await {
        Ok(services) => {
            if !services.is_empty() {
                debug!("Connected BLE HRM supports:");
            }
            for service in services {
                debug!(" Service: {}", service.uuid);
                for characteristic in service.characteristics {
                    debug!("  Characteristic: {}", characteristic);
                }
            }
        }
        Err(e) => warn!("Failed to log GATT services: {}", e),
    }
}

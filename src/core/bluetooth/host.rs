//! bluest implementation of the Bluetooth backend
//! This module owns the real adapter: it runs scans, keeps the device
//! handles they discover, and opens connections to them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::backend::{AdapterControl, AdvertisementFeed, Central, PeripheralLink};
use crate::core::bluetooth::constants::CHANNEL_CAPACITY;
use crate::core::bluetooth::types::{Advertisement, DeviceCandidate, ServiceInfo};
use crate::error::AdapterError;
use crate::utils::lock;

/// Bluetooth backend on top of the system adapter
#[derive(Clone)]
pub struct BluestBackend {
    adapter: Adapter,
    /// Map of device IDs to the handles seen while scanning
    devices: Arc<Mutex<HashMap<String, Device>>>,
    /// Cancels the scan this process is running, if any
    scan_token: Arc<Mutex<Option<CancellationToken>>>,
    connect_timeout: Duration,
}

impl BluestBackend {
    /// Opens the default adapter and waits until it is powered
    pub async fn new(connect_timeout: Duration) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            scan_token: Arc::new(Mutex::new(None)),
            connect_timeout,
        })
    }
}

#[async_trait::async_trait]
impl AdapterControl for BluestBackend {
    // bluest only knows about scans started through it, so this reports
    // whether this process still has one running.
    async fn is_discovering(&self) -> Result<bool, AdapterError> {
        let available = self
            .adapter
            .is_available()
            .await
            .map_err(|e| AdapterError::Other(e.into()))?;
        if !available {
            return Err(AdapterError::NotReady);
        }
        let guard = lock(&self.scan_token);
        Ok(guard.as_ref().is_some_and(|token| !token.is_cancelled()))
    }

    async fn stop_discovery(&self) -> Result<(), AdapterError> {
        let token = lock(&self.scan_token).take();
        match token {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                Ok(())
            }
            Some(_) => Err(AdapterError::AlreadyStopped),
            None => Err(AdapterError::NoDiscoveryStarted),
        }
    }
}

#[async_trait::async_trait]
impl Central for BluestBackend {
    type Link = BluestLink;

    async fn advertisements(&self) -> Result<AdvertisementFeed> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let previous = lock(&self.scan_token).replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let task_token = token.clone();

        tokio::spawn(async move {
            info!("Starting bluetooth scan");
            let mut scan_stream = match adapter.scan(&[]).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    result = scan_stream.next() => {
                        let Some(discovered) = result else {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        };
                        let id = discovered.device.id().to_string();
                        let advertisement = Advertisement {
                            id: id.clone(),
                            name: discovered.adv_data.local_name.clone(),
                            services: discovered.adv_data.services.clone(),
                            rssi: discovered.rssi,
                        };
                        lock(&devices).insert(id, discovered.device);
                        if tx.send(advertisement).await.is_err() {
                            break;
                        }
                    }
                }
            }
            task_token.cancel();
            debug!("Scan task finished.");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(AdvertisementFeed::with_guard(rx, token.drop_guard())),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow!("Scan task exited before the scan started")),
        }
    }

    async fn connect(&self, candidate: &DeviceCandidate) -> Result<BluestLink> {
        let device = lock(&self.devices)
            .get(&candidate.id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", candidate.id))?;

        if !device.is_connected().await {
            info!("Initiating connection to {}...", candidate.id);
            tokio::time::timeout(self.connect_timeout, self.adapter.connect_device(&device))
                .await
                .map_err(|_| anyhow!("BLE connect timed out after {:?}", self.connect_timeout))??;
        }

        let (services, characteristics) = if device.is_connected().await {
            info!("Connection successful, discovering services...");
            match discover_gatt(&device).await {
                Ok(gatt) => gatt,
                Err(e) => {
                    if let Err(disconnect_error) = self.adapter.disconnect_device(&device).await {
                        warn!("Failed to disconnect after service discovery failed: {}", disconnect_error);
                    }
                    return Err(e);
                }
            }
        } else {
            (Vec::new(), HashMap::new())
        };

        Ok(BluestLink {
            adapter: self.adapter.clone(),
            device,
            services,
            characteristics,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }
}

async fn discover_gatt(device: &Device) -> Result<(Vec<ServiceInfo>, HashMap<Uuid, Characteristic>)> {
    let mut services = Vec::new();
    let mut characteristics = HashMap::new();
    for service in device.discover_services().await? {
        let mut uuids = Vec::new();
        for characteristic in service.characteristics().await? {
            uuids.push(characteristic.uuid());
            characteristics.insert(characteristic.uuid(), characteristic);
        }
        services.push(ServiceInfo {
            uuid: service.uuid(),
            characteristics: uuids,
        });
    }
    Ok((services, characteristics))
}

/// A connected heart-rate monitor
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    services: Vec<ServiceInfo>,
    characteristics: HashMap<Uuid, Characteristic>,
    /// Cancels the forwarding task of each active subscription
    subscriptions: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl BluestLink {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid)
            .ok_or_else(|| anyhow!("Characteristic not found: {}", uuid))
    }
}

#[async_trait::async_trait]
impl PeripheralLink for BluestLink {
    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        Ok(self.services.clone())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        Ok(self.characteristic(characteristic)?.read().await?)
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<mpsc::Receiver<Vec<u8>>> {
        let characteristic = self.characteristic(uuid)?.clone();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            let mut notification_stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    item = notification_stream.next() => match item {
                        Some(Ok(value)) => {
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("Notification stream for {} ended", uuid);
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(anyhow!("Notification task for {} exited early", uuid)),
        }

        let previous = lock(&self.subscriptions).insert(uuid, token);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<()> {
        let token = lock(&self.subscriptions).remove(&uuid);
        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(anyhow!("Not subscribed to {}", uuid)),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let tokens: Vec<CancellationToken> = lock(&self.subscriptions).drain().map(|(_, t)| t).collect();
        for token in tokens {
            token.cancel();
        }

        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter.disconnect_device(&self.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }
}

//! Scripted Bluetooth backend and recording sink shared by the
//! integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use hrm_bridge_lib::core::bluetooth::{
    AdapterControl, Advertisement, AdvertisementFeed, Central, DeviceCandidate, PeripheralLink, ServiceInfo,
    UUID_HEART_RATE_SERVICE,
};
use hrm_bridge_lib::core::{ContactStatus, SensorLocation, SensorSink};
use hrm_bridge_lib::error::AdapterError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

pub fn hrm(id: &str, rssi: i16) -> Advertisement {
    Advertisement {
        id: id.to_string(),
        name: Some(format!("HRM {}", id)),
        services: vec![UUID_HEART_RATE_SERVICE],
        rssi: Some(rssi),
    }
}

pub fn other_device(id: &str, rssi: i16) -> Advertisement {
    Advertisement {
        id: id.to_string(),
        name: None,
        services: vec![Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb)],
        rssi: Some(rssi),
    }
}

/// Advertisements of one scan, each delivered after its offset from the
/// start of the scan.
pub type ScanScript = Vec<(Duration, Advertisement)>;

struct LinkState {
    connected: AtomicBool,
    /// Link drops once this much time has passed since `connect`
    lifetime: Option<Duration>,
    connected_at: Mutex<Option<Instant>>,
    reads: Mutex<HashMap<Uuid, VecDeque<Result<Vec<u8>, String>>>>,
    /// Reads of these characteristics never complete
    stalled: HashSet<Uuid>,
    read_log: Mutex<Vec<(Uuid, Instant)>>,
    notifications: Vec<Vec<u8>>,
    notify_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    fail_subscribe: bool,
    subscribed: AtomicBool,
    unsubscribed: AtomicBool,
    disconnected_at: Mutex<Option<Instant>>,
}

/// Scripted peripheral. Clones share state so tests can inspect the link
/// handed to the engine.
#[derive(Clone)]
pub struct MockLink {
    state: Arc<LinkState>,
}

pub struct MockLinkBuilder {
    connected: bool,
    lifetime: Option<Duration>,
    reads: HashMap<Uuid, VecDeque<Result<Vec<u8>, String>>>,
    stalled: HashSet<Uuid>,
    notifications: Vec<Vec<u8>>,
    fail_subscribe: bool,
}

impl MockLinkBuilder {
    pub fn not_connected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Queues read results for `uuid`; the last one repeats.
    pub fn reads(mut self, uuid: Uuid, results: Vec<Result<Vec<u8>, String>>) -> Self {
        self.reads.insert(uuid, results.into());
        self
    }

    pub fn stall(mut self, uuid: Uuid) -> Self {
        self.stalled.insert(uuid);
        self
    }

    pub fn notification(mut self, payload: Vec<u8>) -> Self {
        self.notifications.push(payload);
        self
    }

    pub fn fail_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn build(self) -> MockLink {
        MockLink {
            state: Arc::new(LinkState {
                connected: AtomicBool::new(self.connected),
                lifetime: self.lifetime,
                connected_at: Mutex::new(None),
                reads: Mutex::new(self.reads),
                stalled: self.stalled,
                read_log: Mutex::new(Vec::new()),
                notifications: self.notifications,
                notify_tx: Mutex::new(None),
                fail_subscribe: self.fail_subscribe,
                subscribed: AtomicBool::new(false),
                unsubscribed: AtomicBool::new(false),
                disconnected_at: Mutex::new(None),
            }),
        }
    }
}

impl MockLink {
    pub fn builder() -> MockLinkBuilder {
        MockLinkBuilder {
            connected: true,
            lifetime: None,
            reads: HashMap::new(),
            stalled: HashSet::new(),
            notifications: Vec::new(),
            fail_subscribe: false,
        }
    }

    fn mark_connected(&self) {
        *self.state.connected_at.lock().unwrap() = Some(Instant::now());
    }

    /// Simulates the peripheral going out of range.
    pub fn drop_link(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }

    pub fn reads_of(&self, uuid: Uuid) -> Vec<Instant> {
        self.state
            .read_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(read, _)| *read == uuid)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn was_subscribed(&self) -> bool {
        self.state.subscribed.load(Ordering::SeqCst)
    }

    pub fn was_unsubscribed(&self) -> bool {
        self.state.unsubscribed.load(Ordering::SeqCst)
    }

    pub fn disconnected_at(&self) -> Option<Instant> {
        *self.state.disconnected_at.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl PeripheralLink for MockLink {
    async fn is_connected(&self) -> bool {
        if !self.state.connected.load(Ordering::SeqCst) {
            return false;
        }
        match (self.state.lifetime, *self.state.connected_at.lock().unwrap()) {
            (Some(lifetime), Some(at)) => Instant::now() < at + lifetime,
            _ => true,
        }
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        Ok(vec![ServiceInfo {
            uuid: UUID_HEART_RATE_SERVICE,
            characteristics: vec![hrm_bridge_lib::core::bluetooth::UUID_HEART_RATE_MEASUREMENT],
        }])
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.state.read_log.lock().unwrap().push((characteristic, Instant::now()));
        if self.state.stalled.contains(&characteristic) {
            std::future::pending::<()>().await;
        }
        let mut reads = self.state.reads.lock().unwrap();
        let queue = reads
            .get_mut(&characteristic)
            .ok_or_else(|| anyhow!("characteristic {} not supported", characteristic))?;
        let result = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match result {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("no value scripted for {}", characteristic)),
        }
    }

    async fn subscribe(&self, _characteristic: Uuid) -> Result<mpsc::Receiver<Vec<u8>>> {
        if self.state.fail_subscribe {
            return Err(anyhow!("notifications not permitted"));
        }
        let (tx, rx) = mpsc::channel(64);
        for payload in &self.state.notifications {
            tx.try_send(payload.clone())?;
        }
        *self.state.notify_tx.lock().unwrap() = Some(tx);
        self.state.subscribed.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<()> {
        self.state.notify_tx.lock().unwrap().take();
        self.state.unsubscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.notify_tx.lock().unwrap().take();
        self.state.connected.store(false, Ordering::SeqCst);
        *self.state.disconnected_at.lock().unwrap() = Some(Instant::now());
        Ok(())
    }
}

struct CentralState {
    scans: Mutex<VecDeque<ScanScript>>,
    scan_starts: Mutex<Vec<Instant>>,
    links: Mutex<VecDeque<Result<MockLink, String>>>,
    connects: AtomicUsize,
    discovering: AtomicBool,
    stop_calls: AtomicUsize,
}

/// Scripted central. Each scan plays the next script; once the scripts run
/// out every scan is silent.
#[derive(Clone)]
pub struct MockCentral {
    state: Arc<CentralState>,
}

impl MockCentral {
    pub fn new(scans: Vec<ScanScript>) -> Self {
        Self {
            state: Arc::new(CentralState {
                scans: Mutex::new(scans.into()),
                scan_starts: Mutex::new(Vec::new()),
                links: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
                discovering: AtomicBool::new(false),
                stop_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_link(self, link: MockLink) -> Self {
        self.state.links.lock().unwrap().push_back(Ok(link));
        self
    }

    pub fn with_connect_error(self, message: &str) -> Self {
        self.state.links.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    /// Pretends another process left discovery running.
    pub fn discovering(self) -> Self {
        self.state.discovering.store(true, Ordering::SeqCst);
        self
    }

    pub fn scan_starts(&self) -> Vec<Instant> {
        self.state.scan_starts.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.state.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AdapterControl for MockCentral {
    async fn is_discovering(&self) -> Result<bool, AdapterError> {
        Ok(self.state.discovering.load(Ordering::SeqCst))
    }

    async fn stop_discovery(&self) -> Result<(), AdapterError> {
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.discovering.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::AlreadyStopped)
        }
    }
}

#[async_trait::async_trait]
impl Central for MockCentral {
    type Link = MockLink;

    async fn advertisements(&self) -> Result<AdvertisementFeed> {
        self.state.scan_starts.lock().unwrap().push(Instant::now());
        let script = self.state.scans.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let started = Instant::now();
            for (offset, advertisement) in script {
                tokio::time::sleep_until(started + offset).await;
                if tx.send(advertisement).await.is_err() {
                    return;
                }
            }
            // Keep the feed open like a real scan until it is dropped.
            tx.closed().await;
        });
        Ok(AdvertisementFeed::new(rx))
    }

    async fn connect(&self, candidate: &DeviceCandidate) -> Result<MockLink> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.state.links.lock().unwrap().pop_front();
        match next {
            Some(Ok(link)) => {
                link.mark_connected();
                Ok(link)
            }
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("no link scripted for {}", candidate.id)),
        }
    }
}

/// Sink that keeps every update for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub addresses: Mutex<Vec<String>>,
    pub sources: Mutex<Vec<String>>,
    pub manufacturer: Mutex<Option<String>>,
    pub model: Mutex<Option<String>>,
    pub serial_number: Mutex<Option<String>>,
    pub heart_rates: Mutex<Vec<u16>>,
    pub contact: Mutex<Option<ContactStatus>>,
    pub battery_levels: Mutex<Vec<u8>>,
    pub locations: Mutex<Vec<Option<SensorLocation>>>,
}

impl SensorSink for RecordingSink {
    fn update_address(&self, address: &str) {
        self.addresses.lock().unwrap().push(address.to_string());
    }

    fn update_source(&self, source: &str) {
        self.sources.lock().unwrap().push(source.to_string());
    }

    fn update_manufacturer(&self, manufacturer: &str) {
        *self.manufacturer.lock().unwrap() = Some(manufacturer.to_string());
    }

    fn update_model(&self, model: &str) {
        *self.model.lock().unwrap() = Some(model.to_string());
    }

    fn update_serial_number(&self, serial_number: &str) {
        *self.serial_number.lock().unwrap() = Some(serial_number.to_string());
    }

    fn update_heart_rate(&self, bpm: u16) {
        self.heart_rates.lock().unwrap().push(bpm);
    }

    fn update_skin_contact(&self, status: ContactStatus) {
        *self.contact.lock().unwrap() = Some(status);
    }

    fn update_energy_expended(&self, _kcal: u16) {}

    fn update_rr_intervals(&self, _intervals: &[u16]) {}

    fn update_battery_level(&self, percent: u8) {
        self.battery_levels.lock().unwrap().push(percent);
    }

    fn update_sensor_location(&self, location: Option<SensorLocation>) {
        self.locations.lock().unwrap().push(location);
    }
}

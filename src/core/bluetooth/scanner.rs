
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::core::bluetooth::backend::Central;
use crate::core::bluetooth::constants::UUID_HEART_RATE_SERVICE;
use crate::core::bluetooth::types::{Advertisement, DeviceCandidate, MonitorStatus};

/// Outcome of offering one advertisement to a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    NotHeartRate,
    BelowThreshold,
    /// Recorded; `first` is set for the first eligible device of the scan
    Accepted { first: bool },
}

/// Why a scan stopped waiting for advertisements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    Timeout,
    BonusWindowExpired,
}

/// State of one discovery scan
#[derive(Debug)]
pub struct ScanSession {
    started: Instant,
    timeout: Duration,
    bonus_window: Duration,
    bonus_window_start: Option<Instant>,
    candidates: HashMap<String, DeviceCandidate>,
}

impl ScanSession {
    pub fn new(started: Instant, timeout: Duration, bonus_window: Duration) -> Self {
        Self {
            started,
            timeout,
            bonus_window,
            bonus_window_start: None,
            candidates: HashMap::new(),
        }
    }

    /// Filters an advertisement and records it when eligible.
    ///
    /// Repeat sightings of a device replace its earlier signal strength.
    pub fn offer(&mut self, advertisement: Advertisement, service: Uuid, rssi_threshold: i16, now: Instant) -> Admission {
        if !advertisement.advertises(service) {
            return Admission::NotHeartRate;
        }
        let rssi = match advertisement.rssi {
            Some(rssi) if rssi >= rssi_threshold => rssi,
            _ => return Admission::BelowThreshold,
        };

        self.candidates.insert(
            advertisement.id.clone(),
            DeviceCandidate {
                id: advertisement.id,
                name: advertisement.name,
                services: advertisement.services,
                rssi,
            },
        );

        let first = self.bonus_window_start.is_none();
        if first {
            self.bonus_window_start = Some(now);
        }
        Admission::Accepted { first }
    }

    /// The instant at which the scan must end
    pub fn deadline(&self) -> Instant {
        let timeout_deadline = self.started + self.timeout;
        match self.bonus_window_start {
            Some(start) => timeout_deadline.min(start + self.bonus_window),
            None => timeout_deadline,
        }
    }

    pub fn finished(&self, now: Instant) -> Option<ScanEnd> {
        if now >= self.started + self.timeout {
            Some(ScanEnd::Timeout)
        } else if self.bonus_window_start.is_some() && now >= self.deadline() {
            Some(ScanEnd::BonusWindowExpired)
        } else {
            None
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// The candidate with the strongest signal, if any was accepted
    pub fn best(self) -> Option<DeviceCandidate> {
        self.candidates.into_values().max_by_key(|candidate| candidate.rssi)
    }
}

/// Bounded discovery scan for heart-rate monitors
pub struct HrmScanner {
    rssi_threshold: i16,
    bonus_window: Duration,
    per_event_timeout: Duration,
    status: Arc<MonitorStatus>,
    cancel_token: CancellationToken,
}

impl HrmScanner {
    pub fn new(config: &MonitorConfig, status: Arc<MonitorStatus>, cancel_token: CancellationToken) -> Self {
        Self {
            rssi_threshold: config.rssi_threshold,
            bonus_window: config.bonus_scan_window(),
            per_event_timeout: config.per_event_timeout(),
            status,
            cancel_token,
        }
    }

    /// Scans for up to `timeout` and returns the strongest eligible monitor.
    pub async fn scan<C: Central + ?Sized>(&self, central: &C, timeout: Duration) -> Result<Option<DeviceCandidate>> {
        self.status.set_scanning(true);
        let result = self.run_scan(central, timeout).await;
        self.status.set_scanning(false);
        result
    }

    async fn run_scan<C: Central + ?Sized>(&self, central: &C, timeout: Duration) -> Result<Option<DeviceCandidate>> {
        info!("Starting device discovery scan for BLE Heart Rate Monitor...");
        let mut feed = central.advertisements().await?;
        let mut session = ScanSession::new(Instant::now(), timeout, self.bonus_window);

        loop {
            let now = Instant::now();
            match session.finished(now) {
                Some(ScanEnd::Timeout) => {
                    debug!("BLE HRM discovery scan timeout reached.");
                    break;
                }
                Some(ScanEnd::BonusWindowExpired) => {
                    debug!("BLE HRM discovery scan bonus window expired.");
                    break;
                }
                None => {}
            }
            if self.cancel_token.is_cancelled() {
                debug!("BLE HRM discovery scan stopped on request.");
                return Ok(None);
            }

            // Bounded so the deadline and the stop flag are rechecked even
            // when the feed goes quiet.
            let wait = self.per_event_timeout.min(session.deadline() - now);
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => continue,
                event = tokio::time::timeout(wait, feed.next()) => event,
            };

            let advertisement = match event {
                Err(_) => continue,
                Ok(None) => {
                    info!("Bluetooth scan stream has ended.");
                    break;
                }
                Ok(Some(advertisement)) => advertisement,
            };

            let id = advertisement.id.clone();
            let rssi = advertisement.rssi;
            match session.offer(advertisement, UUID_HEART_RATE_SERVICE, self.rssi_threshold, Instant::now()) {
                Admission::NotHeartRate => debug!("BLE scan found device {} is not a HRM.", id),
                Admission::BelowThreshold => debug!(
                    "BLE scan ignoring HRM {} because signal strength {:?} dB < {} dB threshold.",
                    id, rssi, self.rssi_threshold
                ),
                Admission::Accepted { first } => {
                    debug!("BLE Scanner found HRM device: {} ({:?} dB)", id, rssi);
                    if first {
                        info!(
                            "Found a BLE HRM, extending search for {:?} in case there are other HRM devices.",
                            self.bonus_window
                        );
                    }
                }
            }
        }

        debug!("Scan ended with {} eligible device(s).", session.candidate_count());
        let best = session.best();
        match &best {
            Some(candidate) => info!(
                "HRM with the strongest signal selected: ({} dB): {}",
                candidate.rssi, candidate.id
            ),
            None => info!("No BLE Heart Rate Monitor found during scan window."),
        }
        Ok(best)
    }
}

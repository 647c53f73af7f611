//! Heart-rate monitor manager
//! This module runs the scan -> connect -> backoff cycle and provides the
//! start/stop handle used by the rest of the gateway.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::core::bluetooth::adapter::stop_existing_discovery;
use crate::core::bluetooth::backend::Backend;
use crate::core::bluetooth::connection::{ConnectionManager, SessionOutcome};
use crate::core::bluetooth::scanner::HrmScanner;
use crate::core::bluetooth::types::{MonitorPhase, MonitorStatus};
use crate::core::heart_rate::SensorSink;
use crate::utils::lock;

/// Exponential delay between scan cycles
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    /// The delay the next failed cycle will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to wait after a failed cycle and doubles the next one.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.checked_mul(2).unwrap_or(self.max).min(self.max);
        delay
    }

    /// Returns the delay to wait after a cycle that reached the connected
    /// state, and restarts the sequence.
    pub fn on_success(&mut self) -> Duration {
        self.current = self.initial;
        self.initial
    }
}

/// The scan -> connect -> backoff state machine
pub struct MonitorLoop<B: Backend> {
    backend: B,
    config: MonitorConfig,
    status: Arc<MonitorStatus>,
    cancel_token: CancellationToken,
    scanner: HrmScanner,
    connection: ConnectionManager,
}

impl<B: Backend> MonitorLoop<B> {
    pub fn new(
        backend: B,
        config: MonitorConfig,
        sink: Arc<dyn SensorSink>,
        status: Arc<MonitorStatus>,
        cancel_token: CancellationToken,
    ) -> Self {
        let scanner = HrmScanner::new(&config, status.clone(), cancel_token.clone());
        let connection = ConnectionManager::new(&config, sink, status.clone(), cancel_token.clone());
        Self {
            backend,
            config,
            status,
            cancel_token,
            scanner,
            connection,
        }
    }

    /// Runs until the cancel token fires.
    pub async fn run(self) {
        let mut backoff = Backoff::new(self.config.initial_recheck_interval(), self.config.max_recheck_interval());
        let mut scan_timeout = self.config.initial_scan_timeout();

        self.status.set_phase(MonitorPhase::ReconcilingAdapter);
        stop_existing_discovery(&self.backend).await;

        while !self.cancel_token.is_cancelled() {
            self.status.set_phase(MonitorPhase::Scanning);
            let delay = match self.scanner.scan(&self.backend, scan_timeout).await {
                Ok(Some(device)) => {
                    if self.cancel_token.is_cancelled() {
                        break;
                    }
                    self.status.set_target_device(Some(device.id.clone()));
                    self.status.set_phase(MonitorPhase::ConnectingAndMonitoring);
                    let result = self.connection.run(&self.backend, &device).await;
                    self.status.set_target_device(None);
                    match result {
                        Ok(SessionOutcome::Disconnected) => backoff.on_success(),
                        Ok(SessionOutcome::NotConnected) => backoff.on_failure(),
                        Err(e) if e.is_cancelled() => {
                            info!("BLE HRM monitor loop was cancelled.");
                            break;
                        }
                        Err(e) => {
                            error!("BLE scanner connection error: {}", e);
                            backoff.on_failure()
                        }
                    }
                }
                Ok(None) => {
                    if self.cancel_token.is_cancelled() {
                        break;
                    }
                    info!("No BLE HRM found during scan period.");
                    backoff.on_failure()
                }
                Err(e) => {
                    error!("Error incurred while scanning for bluetooth HRM: {}.", e);
                    backoff.on_failure()
                }
            };

            self.status.set_connected(false);
            scan_timeout = self.config.recheck_duration();

            debug!("Retrying scan for BLE HRM in {:?}.", delay);
            self.status.set_phase(MonitorPhase::BackoffSleep);
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        // Leave the adapter idle for the next consumer.
        let reconcile = stop_existing_discovery(&self.backend);
        if tokio::time::timeout(self.config.supervision_interval(), reconcile).await.is_err() {
            warn!("Timed out stopping bluetooth discovery during shutdown.");
        }
        self.status.set_scanning(false);
        self.status.set_connected(false);
        self.status.set_target_device(None);
        self.status.set_phase(MonitorPhase::Stopped);
        info!("BLE Heart Rate Monitor stopped.");
    }
}

/// Start/stop handle that runs the monitor loop on its own thread
pub struct HrmMonitor {
    config: MonitorConfig,
    sink: Arc<dyn SensorSink>,
    status: Arc<MonitorStatus>,
    cancel_token: Mutex<CancellationToken>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HrmMonitor {
    pub fn new(config: MonitorConfig, sink: Arc<dyn SensorSink>) -> Self {
        Self {
            config,
            sink,
            status: Arc::new(MonitorStatus::new()),
            cancel_token: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        }
    }

    /// Read-only status for health monitoring
    pub fn status(&self) -> Arc<MonitorStatus> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Starts the monitor loop on a dedicated thread with its own runtime.
    ///
    /// `connect_backend` is called on that thread, and again with backoff
    /// for as long as it fails, until a backend is available or `stop` is
    /// called.
    pub fn start<B, F, Fut>(&self, connect_backend: F) -> Result<()>
    where
        B: Backend + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<B>>,
    {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(anyhow!("BLE Heart Rate Monitor is already running"));
        }

        let cancel_token = CancellationToken::new();
        *lock(&self.cancel_token) = cancel_token.clone();

        let config = self.config.clone();
        let sink = self.sink.clone();
        let status = self.status.clone();

        let handle = thread::Builder::new()
            .name("hrm-monitor".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to create Tokio runtime for the HRM monitor: {}", e);
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut backoff =
                        Backoff::new(config.initial_recheck_interval(), config.max_recheck_interval());
                    let backend = loop {
                        let result = tokio::select! {
                            _ = cancel_token.cancelled() => {
                                status.set_phase(MonitorPhase::Stopped);
                                return;
                            }
                            result = connect_backend() => result,
                        };
                        match result {
                            Ok(backend) => break backend,
                            Err(e) => {
                                let delay = backoff.on_failure();
                                error!("Failed to open Bluetooth backend: {}. Retrying in {:?}.", e, delay);
                                tokio::select! {
                                    _ = cancel_token.cancelled() => {
                                        status.set_phase(MonitorPhase::Stopped);
                                        return;
                                    }
                                    _ = tokio::time::sleep(delay) => {}
                                }
                            }
                        }
                    };
                    MonitorLoop::new(backend, config, sink, status, cancel_token).run().await;
                });
            })?;

        *worker = Some(handle);
        info!("BLE Heart Rate Monitor started.");
        Ok(())
    }

    /// Requests shutdown. Safe to call from any thread; returns immediately.
    pub fn stop(&self) {
        debug!("Stopping BLE Heart Rate Monitor Scanner");
        lock(&self.cancel_token).cancel();
    }

    /// Waits for the monitor thread to exit.
    pub fn join(&self) -> Result<()> {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("BLE Heart Rate Monitor thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for HrmMonitor {
    fn drop(&mut self) {
        lock(&self.cancel_token).cancel();
    }
}

//! Low-frequency polling of slowly-changing characteristics
//! The poller runs beside the notification stream while a monitor is
//! connected and is owned by the connection session, which cancels it
//! and waits for it before the link is released.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::backend::PeripheralLink;
use crate::core::bluetooth::constants::UUID_BATTERY_LEVEL;
use crate::core::heart_rate::SensorSink;

/// Handle to a running poller task
pub struct PollerHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancels the poller and waits until it has stopped.
    ///
    /// Once this returns no further characteristic read will be issued.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        match self.task.await {
            Ok(()) => debug!("Low-frequency poller stopped."),
            Err(e) if e.is_cancelled() => debug!("Low-frequency poller task was aborted."),
            Err(e) => error!("Low-frequency poller finished with an unexpected join error: {:?}", e),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns the battery poller for `link`.
pub fn spawn_poller<L>(
    link: Arc<L>,
    sink: Arc<dyn SensorSink>,
    delay: Duration,
    cancel_token: CancellationToken,
) -> PollerHandle
where
    L: PeripheralLink + ?Sized + 'static,
{
    let task_token = cancel_token.clone();
    let task = tokio::spawn(async move {
        info!("Low-frequency poller started (every {:?}).", delay);
        loop {
            if task_token.is_cancelled() || !link.is_connected().await {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = task_token.cancelled() => break,
                result = link.read(UUID_BATTERY_LEVEL) => result,
            };
            let battery = result.and_then(|raw| {
                raw.first()
                    .copied()
                    .ok_or_else(|| anyhow!("empty battery level value"))
            });
            match battery {
                Ok(percent) => {
                    sink.update_battery_level(percent);
                    debug!("[Low-Freq Poll] HRM battery level: {}%", percent);
                }
                Err(e) => warn!("[Low-Freq Poll] HRM battery poll failed: {}", e),
            }

            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Low-frequency poller exiting.");
    });

    PollerHandle { cancel_token, task }
}

//! Adapter discovery reconciliation
//! Starting a scan while the adapter is already discovering fails on some
//! stacks, so any running discovery is stopped before each scan. This is
//! advisory cleanup: nothing here can prevent the scan from being tried.

use log::{debug, warn};

use crate::core::bluetooth::backend::AdapterControl;
use crate::error::AdapterError;

/// Result of one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The adapter was not discovering
    Idle,
    /// A running discovery was stopped, or was found already stopped
    Stopped,
    /// The adapter was not ready; the scan will be attempted anyway
    NotReady,
    /// Reconciliation failed; the scan will be attempted anyway
    Failed,
}

/// Ensures the adapter is not discovering. Never fails.
pub async fn stop_existing_discovery<A: AdapterControl + ?Sized>(adapter: &A) -> Reconciliation {
    debug!("Attempting to stop any existing bluetooth discovery processes...");
    let discovering = match adapter.is_discovering().await {
        Ok(discovering) => discovering,
        Err(AdapterError::NotReady) => {
            debug!("Adapter not ready; skipping discovery reconciliation.");
            return Reconciliation::NotReady;
        }
        Err(e) => {
            warn!("Failed to query bluetooth discovery state: {}", e);
            return Reconciliation::Failed;
        }
    };

    if !discovering {
        debug!("No bluetooth discovery currently active, nothing to stop.");
        return Reconciliation::Idle;
    }

    debug!("Existing bluetooth discovery process found. Attempting to stop it.");
    match adapter.stop_discovery().await {
        Ok(()) => {
            debug!("Successfully stopped existing bluetooth discovery process.");
            Reconciliation::Stopped
        }
        Err(AdapterError::NotReady) => {
            debug!("Adapter not ready while stopping discovery.");
            Reconciliation::NotReady
        }
        Err(AdapterError::AlreadyStopped | AdapterError::NoDiscoveryStarted) => {
            debug!("Existing bluetooth discovery was stopped by another process before we could stop it.");
            Reconciliation::Stopped
        }
        Err(AdapterError::Other(e)) => {
            warn!("Failed to stop existing bluetooth discovery process due to error: {}", e);
            Reconciliation::Failed
        }
    }
}

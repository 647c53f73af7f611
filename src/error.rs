//! Error types shared by the heart-rate client.

use thiserror::Error;

/// Failure decoding one heart-rate measurement notification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The notification carried no bytes at all.
    #[error("empty heart rate notification")]
    Empty,
    /// The flags announced a heart-rate value longer than the payload.
    #[error("heart rate value truncated: need {needed} bytes, got {available}")]
    TruncatedHeartRate { needed: usize, available: usize },
}

/// Failure reported by the host adapter when reconciling discovery state.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bluetooth adapter is not ready")]
    NotReady,
    #[error("discovery already stopped")]
    AlreadyStopped,
    #[error("no discovery started")]
    NoDiscoveryStarted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reason a connection session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A stop was requested while the session was running.
    #[error("connection session cancelled")]
    Cancelled,
    /// Any failure of the physical link; retried by the monitor loop.
    #[error("connection session failed: {0}")]
    Link(#[from] anyhow::Error),
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Invalid monitor configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("max_recheck_interval_secs ({max}) is below initial_recheck_interval_secs ({initial})")]
    BackoffCap { initial: u64, max: u64 },
    #[error("rssi_threshold ({0} dB) must not be positive")]
    PositiveRssi(i16),
}

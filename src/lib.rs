//! Heart-rate bridge library
//! Discovers a Bluetooth LE heart-rate monitor, keeps a connection to it and
//! publishes every decoded reading to a shared sensor-state sink.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

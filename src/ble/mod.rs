//! BLE discovery and connection core
//!
//! This module provides the platform-independent part of the crate:
//! - Device registry (deduplicated, ordered scan results)
//! - Scan controller (scan on/off state, per-event presentation updates)
//! - Connection controller (GATT connection lifecycle)

pub mod constants;
pub mod types;
pub mod error;
pub mod registry;
pub mod scanner;
pub mod connection;

// Re-export commonly used items
pub use constants::*;
pub use types::*;
pub use error::BleError;
pub use registry::DeviceRegistry;
pub use scanner::ScanController;
pub use connection::{ConnectionController, ConnectionSession};

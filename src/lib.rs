//! ble-scout: BLE device discovery and connection
//!
//! This library scans for nearby Bluetooth Low Energy peripherals, keeps a
//! deduplicated list of what it has seen, and drives the GATT connection
//! lifecycle for a selected device.

pub mod ble;
pub mod config;
pub mod manager;
pub mod platform;

// Re-export commonly used items
pub use ble::{
    BleError, BleEvent, ConnectionState, GattService, ScanObservation, ScanOptions, ScanState,
};
pub use config::Config;
pub use manager::BleManager;
pub use platform::{BtleplugPlatform, MockPlatform, PlatformEvent};

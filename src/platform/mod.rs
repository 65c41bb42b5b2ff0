//! Platform abstraction for the Bluetooth radio
//!
//! The controllers never talk to a Bluetooth stack directly. They issue
//! fire-and-forget requests through these traits, and the stack answers later
//! with a [`PlatformEvent`] pushed onto the dispatcher queue.

pub mod btleplug_backend;
pub mod mock;

pub use btleplug_backend::{BtleplugHandle, BtleplugPlatform};
pub use mock::{MockCall, MockHandle, MockPlatform};

use thiserror::Error;

use crate::ble::types::{GattService, ProfileState, ScanObservation, ScanOptions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Callbacks delivered by the Bluetooth stack, in radio order
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    ScanResult(ScanObservation),
    ScanFailed { code: i32 },
    ConnectionStateChanged {
        address: String,
        status: i32,
        new_state: ProfileState,
    },
    ServicesDiscovered {
        address: String,
        services: Vec<GattService>,
    },
}

/// Scanning capability of the underlying stack
pub trait ScanPlatform {
    /// Whether the location/proximity permission needed for scanning is granted
    fn has_permission(&self) -> bool;

    /// Whether the radio is powered on
    fn adapter_enabled(&self) -> bool;

    /// Ask the stack to begin reporting advertisements
    fn start_scan(&self, options: &ScanOptions) -> Result<(), PlatformError>;

    /// Ask the stack to stop reporting advertisements
    fn stop_scan(&self);
}

/// GATT client capability of the underlying stack
pub trait GattPlatform {
    /// Platform connection resource. Released by passing it to [`GattPlatform::close`].
    type Handle;

    /// Issue a connect request for `address`
    fn connect(&self, address: &str) -> Result<Self::Handle, PlatformError>;

    /// Ask the stack to enumerate the remote services
    fn discover_services(&self, handle: &Self::Handle) -> Result<(), PlatformError>;

    /// Disconnect and release the connection slot
    fn close(&self, handle: Self::Handle);
}

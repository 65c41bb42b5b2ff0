//! Error taxonomy for scanning and connecting

use thiserror::Error;

use crate::ble::constants::{describe_gatt_status, describe_scan_failure};
use crate::platform::PlatformError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("Bluetooth permission has not been granted")]
    PermissionDenied,

    #[error("Bluetooth adapter is disabled")]
    AdapterDisabled,

    #[error("A connection to {0} is already in progress")]
    AlreadyConnecting(String),

    #[error("Scan failed with code {0} ({name})", name = describe_scan_failure(*.0))]
    ScanFailed(i32),

    #[error("Connection failed with status {0} ({name})", name = describe_gatt_status(*.0))]
    ConnectionFailed(i32),

    #[error("Platform request failed: {0}")]
    Platform(String),
}

impl From<PlatformError> for BleError {
    fn from(err: PlatformError) -> Self {
        BleError::Platform(err.to_string())
    }
}

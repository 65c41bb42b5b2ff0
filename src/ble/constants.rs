//! Bluetooth status codes and timing constants
//!
//! Numeric codes follow the values reported by the Android Bluetooth stack,
//! which is also what most BLE tooling logs. Platform backends translate their
//! own results into these before handing them to the controllers.

// ============================================================================
// GATT Status Codes
// ============================================================================

/// Operation completed successfully
pub const GATT_SUCCESS: i32 = 0;

/// Insufficient authentication for the operation
pub const GATT_INSUFFICIENT_AUTHENTICATION: i32 = 0x05;

/// Connection dropped because the link supervision timeout expired
pub const GATT_CONNECTION_TIMEOUT: i32 = 0x08;

/// Remote device terminated the connection
pub const GATT_REMOTE_TERMINATED: i32 = 0x13;

/// Local host terminated the connection
pub const GATT_LOCAL_TERMINATED: i32 = 0x16;

/// Generic stack error (the infamous 133)
pub const GATT_ERROR: i32 = 0x85;

/// Operation failed for an unspecified reason
pub const GATT_FAILURE: i32 = 0x101;

// ============================================================================
// Profile Connection States
// ============================================================================

pub const STATE_DISCONNECTED: i32 = 0;
pub const STATE_CONNECTING: i32 = 1;
pub const STATE_CONNECTED: i32 = 2;
pub const STATE_DISCONNECTING: i32 = 3;

// ============================================================================
// Scan Failure Codes
// ============================================================================

/// A scan with the same settings is already running
pub const SCAN_FAILED_ALREADY_STARTED: i32 = 1;

/// The scanner could not register the application
pub const SCAN_FAILED_APPLICATION_REGISTRATION_FAILED: i32 = 2;

/// Internal radio error
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// The adapter does not support the requested scan
pub const SCAN_FAILED_FEATURE_UNSUPPORTED: i32 = 4;

/// No hardware slot left for another scanner
pub const SCAN_FAILED_OUT_OF_HARDWARE_RESOURCES: i32 = 5;

/// Scans are being started too often
pub const SCAN_FAILED_SCANNING_TOO_FREQUENTLY: i32 = 6;

// ============================================================================
// Timing Constants
// ============================================================================

/// How long the dispatcher waits for a platform event before checking again (milliseconds)
pub const EVENT_POLL_INTERVAL_MS: u64 = 100;

/// Human readable name for a GATT status code
pub fn describe_gatt_status(status: i32) -> &'static str {
    match status {
        GATT_SUCCESS => "success",
        GATT_INSUFFICIENT_AUTHENTICATION => "insufficient authentication",
        GATT_CONNECTION_TIMEOUT => "connection timeout",
        GATT_REMOTE_TERMINATED => "terminated by peer",
        GATT_LOCAL_TERMINATED => "terminated locally",
        GATT_ERROR => "gatt error",
        GATT_FAILURE => "gatt failure",
        _ => "unknown status",
    }
}

/// Human readable name for a scan failure code
pub fn describe_scan_failure(code: i32) -> &'static str {
    match code {
        SCAN_FAILED_ALREADY_STARTED => "already started",
        SCAN_FAILED_APPLICATION_REGISTRATION_FAILED => "application registration failed",
        SCAN_FAILED_INTERNAL_ERROR => "internal error",
        SCAN_FAILED_FEATURE_UNSUPPORTED => "feature unsupported",
        SCAN_FAILED_OUT_OF_HARDWARE_RESOURCES => "out of hardware resources",
        SCAN_FAILED_SCANNING_TOO_FREQUENTLY => "scanning too frequently",
        _ => "unknown failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_names() {
        assert_eq!(describe_gatt_status(GATT_SUCCESS), "success");
        assert_eq!(describe_gatt_status(133), "gatt error");
        assert_eq!(describe_scan_failure(SCAN_FAILED_OUT_OF_HARDWARE_RESOURCES), "out of hardware resources");
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(describe_gatt_status(-1), "unknown status");
        assert_eq!(describe_scan_failure(42), "unknown failure");
    }
}

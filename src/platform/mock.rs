//! Mock Bluetooth platform for testing.
//!
//! This platform logs requests instead of touching a radio and records every
//! call, so the controllers can be driven without hardware. Clones share the
//! same recorded state.

use log::info;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{GattPlatform, PlatformError, ScanPlatform};
use crate::ble::types::ScanOptions;

/// A request the controllers issued to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    StartScan(ScanOptions),
    StopScan,
    Connect(String),
    DiscoverServices(String),
    Close(String),
}

/// Connection handle issued by the mock. Not `Clone`: it can only be closed once.
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle {
    pub id: u64,
    pub address: String,
}

#[derive(Debug)]
struct MockState {
    permission: bool,
    adapter_enabled: bool,
    reject_scan: bool,
    reject_connect: bool,
    reject_discovery: bool,
    next_handle: u64,
    calls: Vec<MockCall>,
}

/// Mock platform that records calls instead of performing them.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    /// Permission granted, adapter on, every request accepted.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                permission: true,
                adapter_enabled: true,
                reject_scan: false,
                reject_connect: false,
                reject_discovery: false,
                next_handle: 1,
                calls: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock platform state poisoned")
    }

    pub fn set_permission(&self, granted: bool) {
        self.state().permission = granted;
    }

    pub fn set_adapter_enabled(&self, enabled: bool) {
        self.state().adapter_enabled = enabled;
    }

    /// Make `start_scan` fail synchronously
    pub fn set_reject_scan(&self, reject: bool) {
        self.state().reject_scan = reject;
    }

    /// Make `connect` fail synchronously
    pub fn set_reject_connect(&self, reject: bool) {
        self.state().reject_connect = reject;
    }

    /// Make `discover_services` fail synchronously
    pub fn set_reject_discovery(&self, reject: bool) {
        self.state().reject_discovery = reject;
    }

    /// Every call recorded so far, oldest first
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Number of recorded calls equal to `call`
    pub fn count(&self, call: &MockCall) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of scan start requests, whatever their options
    pub fn scan_starts(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::StartScan(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanPlatform for MockPlatform {
    fn has_permission(&self) -> bool {
        self.state().permission
    }

    fn adapter_enabled(&self) -> bool {
        self.state().adapter_enabled
    }

    fn start_scan(&self, options: &ScanOptions) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::StartScan(options.clone()));
        if state.reject_scan {
            info!("[MOCK BLE] Scan request rejected");
            return Err(PlatformError::Rejected("scan".to_string()));
        }
        info!("[MOCK BLE] Start scan: mode={:?}", options.mode);
        Ok(())
    }

    fn stop_scan(&self) {
        info!("[MOCK BLE] Stop scan");
        self.state().calls.push(MockCall::StopScan);
    }
}

impl GattPlatform for MockPlatform {
    type Handle = MockHandle;

    fn connect(&self, address: &str) -> Result<MockHandle, PlatformError> {
        let mut state = self.state();
        state.calls.push(MockCall::Connect(address.to_string()));
        if state.reject_connect {
            info!("[MOCK BLE] Connect to {} rejected", address);
            return Err(PlatformError::UnknownDevice(address.to_string()));
        }
        let id = state.next_handle;
        state.next_handle += 1;
        info!("[MOCK BLE] Connect: {} (handle {})", address, id);
        Ok(MockHandle {
            id,
            address: address.to_string(),
        })
    }

    fn discover_services(&self, handle: &MockHandle) -> Result<(), PlatformError> {
        let mut state = self.state();
        state
            .calls
            .push(MockCall::DiscoverServices(handle.address.clone()));
        if state.reject_discovery {
            info!("[MOCK BLE] Service discovery on {} rejected", handle.address);
            return Err(PlatformError::Rejected("discover services".to_string()));
        }
        info!("[MOCK BLE] Discover services: {}", handle.address);
        Ok(())
    }

    fn close(&self, handle: MockHandle) {
        info!("[MOCK BLE] Close: {} (handle {})", handle.address, handle.id);
        self.state().calls.push(MockCall::Close(handle.address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_across_clones() {
        let platform = MockPlatform::new();
        let other = platform.clone();

        assert!(platform.start_scan(&ScanOptions::default()).is_ok());
        other.stop_scan();

        assert_eq!(platform.scan_starts(), 1);
        assert_eq!(platform.count(&MockCall::StopScan), 1);

        other.clear_calls();
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn mock_issues_distinct_handles() {
        let platform = MockPlatform::new();
        let a = platform.connect("AA").unwrap();
        let b = platform.connect("BB").unwrap();
        assert_ne!(a.id, b.id);

        platform.close(a);
        assert_eq!(platform.count(&MockCall::Close("AA".to_string())), 1);
    }

    #[test]
    fn mock_rejections() {
        let platform = MockPlatform::new();
        platform.set_reject_connect(true);
        assert!(platform.connect("AA").is_err());

        platform.set_reject_scan(true);
        assert!(platform.start_scan(&ScanOptions::default()).is_err());
    }
}

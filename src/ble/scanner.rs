//! Scan controller
//!
//! Owns the scanning on/off state and sits between the platform scanner and
//! the device registry. Every registry mutation produces exactly one
//! presentation event; the full list is never replayed.

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use crate::ble::constants::describe_scan_failure;
use crate::ble::error::BleError;
use crate::ble::registry::DeviceRegistry;
use crate::ble::types::{BleEvent, ScanObservation, ScanOptions, ScanState, Upsert};
use crate::platform::ScanPlatform;

pub struct ScanController<P: ScanPlatform> {
    platform: P,
    registry: DeviceRegistry,
    state: ScanState,
    options: ScanOptions,
    events: Sender<BleEvent>,
}

impl<P: ScanPlatform> ScanController<P> {
    pub fn new(platform: P, events: Sender<BleEvent>) -> Self {
        Self {
            platform,
            registry: DeviceRegistry::new(),
            state: ScanState::Idle,
            options: ScanOptions::default(),
            events,
        }
    }

    /// Whether a scan could be started right now.
    ///
    /// The permission prompt flow consults this before asking the user.
    pub fn can_scan(&self) -> bool {
        self.platform.has_permission() && self.platform.adapter_enabled()
    }

    /// Start a new scan session.
    ///
    /// Permission and adapter state are checked before the platform is asked
    /// to scan. Results from a previous session are discarded.
    pub fn start(&mut self, options: ScanOptions) -> Result<(), BleError> {
        if !self.platform.has_permission() {
            warn!("Scan requested without Bluetooth permission");
            return Err(BleError::PermissionDenied);
        }
        if !self.platform.adapter_enabled() {
            warn!("Scan requested while the adapter is disabled");
            return Err(BleError::AdapterDisabled);
        }
        if self.state == ScanState::Scanning {
            debug!("Scan already running, ignoring start request");
            return Ok(());
        }

        self.platform.start_scan(&options)?;
        self.registry.clear();
        self.options = options;

        info!("Scan started (mode: {:?})", self.options.mode);
        self.set_state(ScanState::Scanning);
        Ok(())
    }

    /// Handle one advertisement.
    ///
    /// Returns `None` when the result was dropped: either the scan is idle
    /// (a trailing result after `stop`) or the address filter rejected it.
    pub fn on_result(&mut self, observation: ScanObservation) -> Option<Upsert> {
        if self.state == ScanState::Idle {
            debug!("Ignoring scan result for {} while idle", observation.address);
            return None;
        }
        if !self.options.filter.accepts_address(&observation.address) {
            debug!("Filtered out scan result for {}", observation.address);
            return None;
        }

        let outcome = self.registry.upsert(observation.clone());
        let event = match outcome {
            Upsert::Inserted => {
                info!(
                    "Found BLE device! Name: {}, address: {}",
                    observation.display_name(),
                    observation.address
                );
                BleEvent::NewDevice { observation }
            }
            Upsert::Updated => BleEvent::UpdatedDevice { observation },
        };
        let _ = self.events.send(event);
        Some(outcome)
    }

    /// Stop scanning. Calling this while idle does nothing.
    pub fn stop(&mut self) {
        if self.state == ScanState::Idle {
            return;
        }
        self.platform.stop_scan();
        info!("Scan stopped ({} devices)", self.registry.len());
        self.set_state(ScanState::Idle);
    }

    /// The platform reported that scanning failed. The controller is idle
    /// before the failure is reported.
    pub fn on_scan_failed(&mut self, code: i32) {
        error!("Scan failed: code {} ({})", code, describe_scan_failure(code));
        if self.state != ScanState::Idle {
            self.set_state(ScanState::Idle);
        }
        let _ = self.events.send(BleEvent::ScanFailed { code });
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Devices seen during the current (or last) scan, in first-seen order
    pub fn devices(&self) -> &[ScanObservation] {
        self.registry.list()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn set_state(&mut self, state: ScanState) {
        self.state = state;
        let _ = self.events.send(BleEvent::ScanStateChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::types::DeviceFilter;
    use crate::platform::{MockCall, MockPlatform};
    use crossbeam_channel::{unbounded, Receiver};

    fn controller() -> (ScanController<MockPlatform>, MockPlatform, Receiver<BleEvent>) {
        let platform = MockPlatform::new();
        let (tx, rx) = unbounded();
        (ScanController::new(platform.clone(), tx), platform, rx)
    }

    #[test]
    fn test_start_without_permission() {
        let (mut scanner, platform, rx) = controller();
        platform.set_permission(false);

        assert_eq!(scanner.start(ScanOptions::default()), Err(BleError::PermissionDenied));
        assert_eq!(scanner.state(), ScanState::Idle);
        assert_eq!(platform.scan_starts(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_with_adapter_disabled() {
        let (mut scanner, platform, _rx) = controller();
        platform.set_adapter_enabled(false);

        assert!(!scanner.can_scan());
        assert_eq!(scanner.start(ScanOptions::default()), Err(BleError::AdapterDisabled));
        assert_eq!(scanner.state(), ScanState::Idle);
        assert_eq!(platform.scan_starts(), 0);
    }

    #[test]
    fn test_start_emits_state_only() {
        let (mut scanner, platform, rx) = controller();

        assert!(scanner.start(ScanOptions::default()).is_ok());
        assert_eq!(scanner.state(), ScanState::Scanning);
        assert_eq!(platform.scan_starts(), 1);

        let events: Vec<BleEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![BleEvent::ScanStateChanged { state: ScanState::Scanning }]);
    }

    #[test]
    fn test_second_start_is_noop() {
        let (mut scanner, platform, _rx) = controller();
        scanner.start(ScanOptions::default()).unwrap();
        scanner.start(ScanOptions::default()).unwrap();
        assert_eq!(platform.scan_starts(), 1);
    }

    #[test]
    fn test_platform_rejection_keeps_idle() {
        let (mut scanner, platform, _rx) = controller();
        platform.set_reject_scan(true);

        assert!(matches!(scanner.start(ScanOptions::default()), Err(BleError::Platform(_))));
        assert_eq!(scanner.state(), ScanState::Idle);
    }

    #[test]
    fn test_rejected_restart_keeps_previous_results() {
        let (mut scanner, platform, _rx) = controller();
        scanner.start(ScanOptions::default()).unwrap();
        scanner.on_result(ScanObservation::new("AA:BB").with_payload(vec![0x02, 0x01, 0x06]));
        scanner.stop();

        platform.set_reject_scan(true);
        assert!(scanner.start(ScanOptions::default()).is_err());
        assert_eq!(scanner.devices().len(), 1);
        assert_eq!(scanner.registry().get("AA:BB").unwrap().payload, vec![0x02, 0x01, 0x06]);

        // A successful restart starts from an empty list
        platform.set_reject_scan(false);
        scanner.start(ScanOptions::default()).unwrap();
        assert!(scanner.registry().is_empty());
    }

    #[test]
    fn test_results_distinguish_insert_and_update() {
        let (mut scanner, _platform, rx) = controller();
        scanner.start(ScanOptions::default()).unwrap();
        let _ = rx.try_iter().count();

        assert_eq!(scanner.on_result(ScanObservation::new("AA:BB").with_name("X")), Some(Upsert::Inserted));
        assert_eq!(scanner.on_result(ScanObservation::new("AA:BB").with_name("Y")), Some(Upsert::Updated));

        let events: Vec<BleEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BleEvent::NewDevice { observation } if observation.name.as_deref() == Some("X")));
        assert!(matches!(&events[1], BleEvent::UpdatedDevice { observation } if observation.name.as_deref() == Some("Y")));
        assert_eq!(scanner.devices().len(), 1);
    }

    #[test]
    fn test_trailing_result_after_stop() {
        let (mut scanner, _platform, rx) = controller();
        scanner.start(ScanOptions::default()).unwrap();
        scanner.stop();
        let _ = rx.try_iter().count();

        assert_eq!(scanner.on_result(ScanObservation::new("AA:BB")), None);
        assert_eq!(scanner.state(), ScanState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut scanner, platform, _rx) = controller();
        scanner.stop();
        assert_eq!(platform.count(&MockCall::StopScan), 0);

        scanner.start(ScanOptions::default()).unwrap();
        scanner.stop();
        scanner.stop();
        assert_eq!(platform.count(&MockCall::StopScan), 1);
    }

    #[test]
    fn test_scan_failure_returns_to_idle() {
        let (mut scanner, _platform, rx) = controller();
        scanner.start(ScanOptions::default()).unwrap();
        let _ = rx.try_iter().count();

        scanner.on_scan_failed(2);
        assert_eq!(scanner.state(), ScanState::Idle);

        let events: Vec<BleEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                BleEvent::ScanStateChanged { state: ScanState::Idle },
                BleEvent::ScanFailed { code: 2 },
            ]
        );
    }

    #[test]
    fn test_new_scan_clears_previous_results() {
        let (mut scanner, _platform, _rx) = controller();
        scanner.start(ScanOptions::default()).unwrap();
        scanner.on_result(ScanObservation::new("AA:BB"));
        scanner.stop();
        assert_eq!(scanner.devices().len(), 1);

        scanner.start(ScanOptions::default()).unwrap();
        assert!(scanner.devices().is_empty());
    }

    #[test]
    fn test_address_filter_drops_results() {
        let (mut scanner, _platform, _rx) = controller();
        let options = ScanOptions {
            filter: DeviceFilter {
                addresses: vec!["AA:BB".to_string()],
                services: Vec::new(),
            },
            ..Default::default()
        };
        scanner.start(options).unwrap();

        assert_eq!(scanner.on_result(ScanObservation::new("CC:DD")), None);
        assert_eq!(scanner.on_result(ScanObservation::new("AA:BB")), Some(Upsert::Inserted));
        assert_eq!(scanner.devices().len(), 1);
    }
}

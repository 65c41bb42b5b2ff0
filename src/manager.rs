//! High-level BLE manager
//!
//! This module ties the scan and connection controllers to one platform and
//! one event queue. Platform callbacks may be produced on any thread; they are
//! only ever applied to the controllers here, one at a time, by whoever drives
//! `pump`/`run_for`.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::ble::connection::ConnectionController;
use crate::ble::constants::EVENT_POLL_INTERVAL_MS;
use crate::ble::error::BleError;
use crate::ble::scanner::ScanController;
use crate::ble::types::{BleEvent, ConnectionState, ScanObservation, ScanState};
use crate::config::Config;
use crate::platform::{GattPlatform, PlatformEvent, ScanPlatform};

/// Manager for scanning and connecting through one platform
pub struct BleManager<P>
where
    P: ScanPlatform + GattPlatform + Clone,
{
    config: Config,
    scanner: ScanController<P>,
    connections: ConnectionController<P>,
    /// Callbacks from the platform, applied in arrival order
    platform_events: Receiver<PlatformEvent>,
    /// Presentation events
    event_receiver: Receiver<BleEvent>,
}

impl<P> BleManager<P>
where
    P: ScanPlatform + GattPlatform + Clone,
{
    /// Create a manager; `platform_events` is the queue the platform reports into
    pub fn new(config: Config, platform: P, platform_events: Receiver<PlatformEvent>) -> Self {
        let (event_sender, event_receiver) = unbounded();

        Self {
            config,
            scanner: ScanController::new(platform.clone(), event_sender.clone()),
            connections: ConnectionController::new(platform, event_sender),
            platform_events,
            event_receiver,
        }
    }

    /// Get the presentation event receiver
    pub fn events(&self) -> &Receiver<BleEvent> {
        &self.event_receiver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn can_scan(&self) -> bool {
        self.scanner.can_scan()
    }

    /// Start scanning with the configured options
    pub fn start_scan(&mut self) -> Result<(), BleError> {
        self.scanner.start(self.config.scan_options())
    }

    pub fn stop_scan(&mut self) {
        self.scanner.stop();
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    pub fn devices(&self) -> &[ScanObservation] {
        self.scanner.devices()
    }

    /// The user picked a device: stop scanning and connect to it
    pub fn select_device(&mut self, address: &str) -> Result<(), BleError> {
        if self.scanner.is_scanning() {
            self.scanner.stop();
        }
        info!("Selected {}", address);
        self.connections.connect(address)
    }

    pub fn connection_state(&self, address: &str) -> Option<ConnectionState> {
        self.connections.state(address)
    }

    /// Release and forget the connection to `address`
    pub fn teardown(&mut self, address: &str) -> Option<ConnectionState> {
        self.connections.teardown(address)
    }

    pub fn scanner(&self) -> &ScanController<P> {
        &self.scanner
    }

    pub fn connections(&self) -> &ConnectionController<P> {
        &self.connections
    }

    /// Apply one platform callback
    pub fn dispatch(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ScanResult(observation) => {
                self.scanner.on_result(observation);
            }
            PlatformEvent::ScanFailed { code } => {
                self.scanner.on_scan_failed(code);
            }
            PlatformEvent::ConnectionStateChanged {
                address,
                status,
                new_state,
            } => {
                self.connections.on_state_changed(&address, status, new_state);
            }
            PlatformEvent::ServicesDiscovered { address, services } => {
                self.connections.on_services_discovered(&address, &services);
            }
        }
    }

    /// Wait up to `timeout` for a platform callback, then apply everything queued.
    ///
    /// Returns the number of callbacks applied.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let first = match self.platform_events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return 0,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Platform event channel disconnected");
                return 0;
            }
        };

        self.dispatch(first);
        let mut applied = 1;
        while let Ok(event) = self.platform_events.try_recv() {
            self.dispatch(event);
            applied += 1;
        }
        debug!("Applied {} platform events", applied);
        applied
    }

    /// Keep applying platform callbacks until `duration` has passed or `until`
    /// returns true for a presentation event.
    ///
    /// Presentation events are forwarded to `on_event` as they are produced.
    pub fn run_for<F, U>(&mut self, duration: Duration, mut on_event: F, mut until: U) -> bool
    where
        F: FnMut(&BleEvent),
        U: FnMut(&BleEvent) -> bool,
    {
        let deadline = Instant::now() + duration;
        let poll = Duration::from_millis(EVENT_POLL_INTERVAL_MS);

        loop {
            for event in self.event_receiver.try_iter() {
                on_event(&event);
                if until(&event) {
                    return true;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump(poll.min(deadline - now));
        }
    }
}

//! Connection controller
//!
//! Drives one [`ConnectionSession`] per connect request. The platform's
//! connection-state callback is the only thing that moves a session forward;
//! any failing status ends the session and releases the platform handle.

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::collections::HashMap;

use crate::ble::constants::{describe_gatt_status, GATT_FAILURE, GATT_SUCCESS};
use crate::ble::error::BleError;
use crate::ble::types::{BleEvent, ConnectionState, GattService, ProfileState};
use crate::platform::GattPlatform;

/// One attempt to connect to a device
#[derive(Debug)]
pub struct ConnectionSession<H> {
    address: String,
    state: ConnectionState,
    last_status: Option<i32>,
    handle: Option<H>,
}

impl<H> ConnectionSession<H> {
    fn new(address: String, handle: H) -> Self {
        Self {
            address,
            state: ConnectionState::Connecting,
            last_status: None,
            handle: Some(handle),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_status(&self) -> Option<i32> {
        self.last_status
    }

    /// Whether the platform handle is still held
    pub fn holds_handle(&self) -> bool {
        self.handle.is_some()
    }
}

pub struct ConnectionController<G: GattPlatform> {
    platform: G,
    sessions: HashMap<String, ConnectionSession<G::Handle>>,
    events: Sender<BleEvent>,
}

impl<G: GattPlatform> ConnectionController<G> {
    pub fn new(platform: G, events: Sender<BleEvent>) -> Self {
        Self {
            platform,
            sessions: HashMap::new(),
            events,
        }
    }

    /// Issue a connect request for `address`.
    ///
    /// A finished (disconnected) session for the same address is replaced.
    pub fn connect(&mut self, address: &str) -> Result<(), BleError> {
        if let Some(session) = self.sessions.get(address) {
            if session.state.is_active() {
                warn!("Connection to {} already {}", address, session.state);
                return Err(BleError::AlreadyConnecting(address.to_string()));
            }
        }

        info!("Connecting to {}", address);
        let handle = self.platform.connect(address)?;

        let mut session = ConnectionSession::new(address.to_string(), handle);
        transition(&mut session, ConnectionState::Connecting, &self.events);
        self.sessions.insert(address.to_string(), session);
        Ok(())
    }

    /// Connection-state callback from the platform.
    ///
    /// A non-success status wins over whatever `new_state` claims.
    pub fn on_state_changed(&mut self, address: &str, status: i32, new_state: ProfileState) {
        let Some(session) = self.sessions.get_mut(address) else {
            warn!("State change for unknown device {} ignored", address);
            return;
        };
        if !session.state.is_active() {
            debug!(
                "State change for {} ignored, session already {}",
                address, session.state
            );
            return;
        }

        session.last_status = Some(status);

        if status != GATT_SUCCESS {
            warn!(
                "Error {} ({}) encountered for {}! Disconnecting...",
                status,
                describe_gatt_status(status),
                address
            );
            fail(session, status, &self.platform, &self.events);
            return;
        }

        match new_state {
            ProfileState::Connected => {
                if session.state != ConnectionState::Connecting {
                    debug!("Duplicate connected report for {}", address);
                    return;
                }
                info!("Successfully connected to {}", address);
                transition(session, ConnectionState::Connected, &self.events);

                let requested = match session.handle.as_ref() {
                    Some(handle) => self.platform.discover_services(handle),
                    None => Ok(()),
                };
                match requested {
                    Ok(()) => {
                        transition(session, ConnectionState::DiscoveringServices, &self.events)
                    }
                    Err(e) => {
                        warn!("Service discovery request for {} failed: {}", address, e);
                        session.last_status = Some(GATT_FAILURE);
                        fail(session, GATT_FAILURE, &self.platform, &self.events);
                    }
                }
            }
            ProfileState::Disconnected => {
                info!("Successfully disconnected from {}", address);
                release(session, &self.platform);
                transition(session, ConnectionState::Disconnected, &self.events);
            }
            ProfileState::Connecting | ProfileState::Disconnecting => {
                debug!("{} is {:?}", address, new_state);
            }
        }
    }

    /// Service discovery finished for `address`
    pub fn on_services_discovered(&mut self, address: &str, services: &[GattService]) {
        let Some(session) = self.sessions.get_mut(address) else {
            warn!("Services discovered for unknown device {} ignored", address);
            return;
        };
        if session.state != ConnectionState::DiscoveringServices {
            debug!(
                "Services discovered for {} ignored, session is {}",
                address, session.state
            );
            return;
        }

        if services.is_empty() {
            info!("No service and characteristic available on {}", address);
        } else {
            info!("Discovered {} services on {}", services.len(), address);
            for service in services {
                info!("\n{}", service.table());
            }
        }
        transition(session, ConnectionState::Ready, &self.events);
    }

    /// Drop the session for `address`, releasing its handle if still held.
    ///
    /// Returns the session's final state, or `None` if there was no session.
    pub fn teardown(&mut self, address: &str) -> Option<ConnectionState> {
        let mut session = self.sessions.remove(address)?;
        if session.state.is_active() {
            info!("Tearing down active connection to {}", address);
            release(&mut session, &self.platform);
            transition(&mut session, ConnectionState::Disconnected, &self.events);
        }
        Some(session.state)
    }

    pub fn state(&self, address: &str) -> Option<ConnectionState> {
        self.sessions.get(address).map(|s| s.state)
    }

    pub fn last_status(&self, address: &str) -> Option<i32> {
        self.sessions.get(address).and_then(|s| s.last_status)
    }

    pub fn session(&self, address: &str) -> Option<&ConnectionSession<G::Handle>> {
        self.sessions.get(address)
    }

    /// Addresses of sessions still holding a connection
    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.state.is_active())
            .map(|s| s.address.clone())
            .collect()
    }
}

impl<G: GattPlatform> Drop for ConnectionController<G> {
    fn drop(&mut self) {
        for session in self.sessions.values_mut() {
            release(session, &self.platform);
        }
    }
}

fn transition<H>(session: &mut ConnectionSession<H>, state: ConnectionState, events: &Sender<BleEvent>) {
    debug!("{}: {} -> {}", session.address, session.state, state);
    session.state = state;
    let _ = events.send(BleEvent::StateChanged {
        address: session.address.clone(),
        state,
    });
}

/// Close the platform handle if it is still held
fn release<G: GattPlatform>(session: &mut ConnectionSession<G::Handle>, platform: &G) {
    if let Some(handle) = session.handle.take() {
        platform.close(handle);
    }
}

fn fail<G: GattPlatform>(
    session: &mut ConnectionSession<G::Handle>,
    status: i32,
    platform: &G,
    events: &Sender<BleEvent>,
) {
    release(session, platform);
    transition(session, ConnectionState::Disconnected, events);
    let _ = events.send(BleEvent::ConnectionFailed {
        address: session.address.clone(),
        code: status,
    });
}

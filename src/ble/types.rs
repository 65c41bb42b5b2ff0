//! BLE type definitions
//!
//! This module defines the data types shared by the registry and both
//! controllers: scan observations, scan options, connection states and the
//! events handed to the presentation layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

use crate::ble::constants::*;
use crate::ble::error::BleError;

/// One sighting of a peripheral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanObservation {
    /// Hardware address, e.g. "AA:BB:CC:DD:EE:FF". Identity key.
    pub address: String,

    /// Advertised local name, if any
    pub name: Option<String>,

    /// Received signal strength (dBm)
    pub rssi: Option<i16>,

    /// Raw advertisement payload, kept opaque
    pub payload: Vec<u8>,

    /// When this advertisement was received
    pub last_seen: SystemTime,
}

impl ScanObservation {
    /// Create an observation for `address` seen now
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi: None,
            payload: Vec::new(),
            last_seen: SystemTime::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Name to show in logs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed")
    }
}

/// Outcome of a registry upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First observation for this address
    Inserted,
    /// Replaced an existing entry in place
    Updated,
}

/// Latency vs power trade-off for scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

/// Optional restriction on which advertisements are reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Only report these addresses (empty = any)
    pub addresses: Vec<String>,

    /// Only report devices advertising one of these services (empty = any)
    pub services: Vec<Uuid>,
}

impl DeviceFilter {
    /// Whether the address filter lets `address` through.
    /// Service filtering is applied by the platform.
    pub fn accepts_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self
                .addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(address))
    }
}

/// Options passed to `ScanController::start`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub filter: DeviceFilter,
}

/// Scan controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// A discovered GATT service and its characteristic UUIDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: Vec<Uuid>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    /// Multi-line table of this service:
    ///
    /// ```text
    /// Service <uuid>
    /// Characteristics:
    /// |--<uuid>
    /// |--<uuid>
    /// ```
    pub fn table(&self) -> String {
        let mut table = format!("Service {}\nCharacteristics:", self.uuid);
        for characteristic in &self.characteristics {
            table.push_str("\n|--");
            table.push_str(&characteristic.to_string());
        }
        table
    }
}

/// Link state reported by the platform alongside a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ProfileState {
    /// Map a raw profile state code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            STATE_DISCONNECTED => Some(Self::Disconnected),
            STATE_CONNECTING => Some(Self::Connecting),
            STATE_CONNECTED => Some(Self::Connected),
            STATE_DISCONNECTING => Some(Self::Disconnecting),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Disconnected => STATE_DISCONNECTED,
            Self::Connecting => STATE_CONNECTING,
            Self::Connected => STATE_CONNECTED,
            Self::Disconnecting => STATE_DISCONNECTING,
        }
    }
}

/// Connection session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    DiscoveringServices,
    Ready,
    Disconnected,
}

impl ConnectionState {
    /// Whether the session still holds a platform connection
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::DiscoveringServices | Self::Ready
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::DiscoveringServices => "discovering services",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Events delivered to the presentation layer, one per mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum BleEvent {
    NewDevice { observation: ScanObservation },
    UpdatedDevice { observation: ScanObservation },
    ScanStateChanged { state: ScanState },
    ScanFailed { code: i32 },
    StateChanged { address: String, state: ConnectionState },
    ConnectionFailed { address: String, code: i32 },
}

impl BleEvent {
    /// The error carried by a failure event
    pub fn as_error(&self) -> Option<BleError> {
        match self {
            Self::ScanFailed { code } => Some(BleError::ScanFailed(*code)),
            Self::ConnectionFailed { code, .. } => Some(BleError::ConnectionFailed(*code)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_service_table() {
        let service = GattService::new(
            Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb),
            vec![
                Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb),
                Uuid::from_u128(0x00002a1a_0000_1000_8000_00805f9b34fb),
            ],
        );
        assert_eq!(
            service.table(),
            "Service 0000180f-0000-1000-8000-00805f9b34fb\n\
             Characteristics:\n\
             |--00002a19-0000-1000-8000-00805f9b34fb\n\
             |--00002a1a-0000-1000-8000-00805f9b34fb"
        );

        let empty = GattService::new(Uuid::nil(), Vec::new());
        assert_eq!(
            empty.table(),
            "Service 00000000-0000-0000-0000-000000000000\nCharacteristics:"
        );
    }

    #[test]
    fn test_profile_state_codes() {
        for state in [
            ProfileState::Disconnected,
            ProfileState::Connecting,
            ProfileState::Connected,
            ProfileState::Disconnecting,
        ] {
            assert_eq!(ProfileState::from_code(state.code()), Some(state));
        }
        assert_eq!(ProfileState::from_code(9), None);
    }

    #[test]
    fn test_active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Ready.is_active());
        assert!(!ConnectionState::Idle.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(ConnectionState::Disconnected.is_terminal());
    }

    #[test]
    fn test_address_filter() {
        let any = DeviceFilter::default();
        assert!(any.accepts_address("AA:BB"));

        let only = DeviceFilter {
            addresses: vec!["aa:bb:cc:dd:ee:ff".to_string()],
            services: Vec::new(),
        };
        assert!(only.accepts_address("AA:BB:CC:DD:EE:FF"));
        assert!(!only.accepts_address("11:22:33:44:55:66"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = BleEvent::ScanFailed { code: 3 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"ScanFailed","code":3}"#);
    }

    #[test]
    fn test_failure_events_carry_errors() {
        let failed = BleEvent::ConnectionFailed { address: "AA".to_string(), code: 8 };
        assert_eq!(failed.as_error(), Some(BleError::ConnectionFailed(8)));
        assert_eq!(BleEvent::ScanFailed { code: 1 }.as_error(), Some(BleError::ScanFailed(1)));
        assert_eq!(BleEvent::ScanStateChanged { state: ScanState::Idle }.as_error(), None);
    }
}

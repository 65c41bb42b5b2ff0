//! Configuration loader and validator
//!
//! Loads scan and connection settings from TOML files in the configs/ directory.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::ble::types::{DeviceFilter, ScanMode, ScanOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub connection: ConnectionSettings,
}

/// Scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Latency vs power trade-off
    #[serde(default)]
    pub mode: ScanMode,

    /// Only report devices advertising one of these service UUIDs
    #[serde(default)]
    pub service_uuids: Vec<String>,

    /// Only report these hardware addresses
    #[serde(default)]
    pub addresses: Vec<String>,

    /// How long the CLI scans before picking a device
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            service_uuids: Vec::new(),
            addresses: Vec::new(),
            duration_secs: default_duration_secs(),
        }
    }
}

fn default_duration_secs() -> u64 { 10 }
fn default_hold_secs() -> u64 { 5 }

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Device to connect to once it shows up
    #[serde(default)]
    pub target_address: Option<String>,

    /// Without a target, connect to the first device found
    #[serde(default)]
    pub connect_first_found: bool,

    /// How long to keep the connection open before tearing it down
    #[serde(default = "default_hold_secs")]
    pub hold_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            target_address: None,
            connect_first_found: false,
            hold_secs: default_hold_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        info!("Loading configuration from: {}", path_ref.display());

        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::parse(&content)?;

        info!("✓ Config loaded");
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        debug!("  - Scan mode: {:?}", config.scan.mode);
        debug!("  - Service filter: {:?}", config.scan.service_uuids);
        debug!("  - Target: {:?}", config.connection.target_address);

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from configs/default.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load("configs/default.toml")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "scan.duration_secs must be greater than 0".into()
            ));
        }

        for uuid in &self.scan.service_uuids {
            if Uuid::parse_str(uuid).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "scan.service_uuids: '{}' is not a valid UUID", uuid
                )));
            }
        }

        for address in &self.scan.addresses {
            if !is_hardware_address(address) {
                return Err(ConfigError::Invalid(format!(
                    "scan.addresses: '{}' is not a hardware address", address
                )));
            }
        }

        if let Some(target) = &self.connection.target_address {
            if !is_hardware_address(target) {
                return Err(ConfigError::Invalid(format!(
                    "connection.target_address: '{}' is not a hardware address", target
                )));
            }
        }

        Ok(())
    }

    /// Scan options described by this configuration
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            mode: self.scan.mode,
            filter: DeviceFilter {
                addresses: self.scan.addresses.clone(),
                // Unparsable entries are rejected by validate()
                services: self
                    .scan
                    .service_uuids
                    .iter()
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect(),
            },
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan.duration_secs)
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.connection.hold_secs)
    }
}

/// "AA:BB:CC:DD:EE:FF" style address (six hex octets, ':' or '-' separated)
pub fn is_hardware_address(s: &str) -> bool {
    let octets: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = Config::default();
        assert_eq!(config.scan.mode, ScanMode::LowLatency);
        assert_eq!(config.scan.duration_secs, 10);
        assert!(config.scan.service_uuids.is_empty());
        assert_eq!(config.connection.target_address, None);
        assert!(!config.connection.connect_first_found);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [scan]
            mode = "balanced"
            service_uuids = ["0000180d-0000-1000-8000-00805f9b34fb"]
            addresses = ["AA:BB:CC:DD:EE:FF"]
            duration_secs = 3

            [connection]
            target_address = "AA:BB:CC:DD:EE:FF"
            hold_secs = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.scan.mode, ScanMode::Balanced);
        let options = config.scan_options();
        assert_eq!(options.mode, ScanMode::Balanced);
        assert_eq!(options.filter.services.len(), 1);
        assert_eq!(options.filter.addresses, vec!["AA:BB:CC:DD:EE:FF".to_string()]);
        assert_eq!(config.scan_duration(), Duration::from_secs(3));
        assert_eq!(config.hold_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.scan.mode, ScanMode::LowLatency);
        assert_eq!(config.connection.hold_secs, 5);
    }

    #[test]
    fn test_invalid_uuid() {
        let result = Config::parse("[scan]\nservice_uuids = [\"test\"]\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_target_address() {
        let result = Config::parse("[connection]\ntarget_address = \"AA:BB\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_duration() {
        let mut config = Config::default();
        config.scan.duration_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let result = Config::parse("[scan]\nmode = \"turbo\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_hardware_address_format() {
        assert!(is_hardware_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_hardware_address("aa-bb-cc-dd-ee-0f"));
        assert!(!is_hardware_address("AA:BB:CC:DD:EE"));
        assert!(!is_hardware_address("AA:BB:CC:DD:EE:GG"));
    }
}

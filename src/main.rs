//! BLE scout - command line front-end
//!
//! Scans for nearby BLE devices, prints every discovery and state change as a
//! JSON line, and optionally connects to a device picked from the results.
//!
//! Usage: ble-scout [config.toml]

use anyhow::Context;
use ble_scout::{BleEvent, BleManager, BtleplugPlatform, Config, ConnectionState};
use log::{info, warn};
use std::time::Duration;
use tokio::runtime::Runtime;

/// How long to wait for a connection to become ready
const CONNECT_WAIT_SECS: u64 = 30;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("{}; using built-in defaults", e);
            Config::default()
        }),
    };

    let runtime = Runtime::new().context("creating tokio runtime")?;
    let (platform_tx, platform_rx) = crossbeam_channel::unbounded();
    let platform = runtime.block_on(BtleplugPlatform::new(platform_tx))?;

    let mut manager = BleManager::new(config.clone(), platform, platform_rx);

    manager.start_scan()?;

    let target = config.connection.target_address.clone();
    let connect_first = config.connection.connect_first_found;
    let mut chosen: Option<String> = None;

    manager.run_for(config.scan_duration(), print_event, |event| {
        let BleEvent::NewDevice { observation } = event else {
            return false;
        };
        let wanted = match &target {
            Some(address) => address.eq_ignore_ascii_case(&observation.address),
            None => connect_first,
        };
        if wanted {
            chosen = Some(observation.address.clone());
        }
        wanted
    });

    manager.stop_scan();

    let Some(address) = chosen else {
        info!("Scan finished, {} devices seen:", manager.devices().len());
        for device in manager.devices() {
            info!("  {} {} (rssi {:?})", device.address, device.display_name(), device.rssi);
        }
        return Ok(());
    };

    manager.select_device(&address)?;

    let settled = |event: &BleEvent| {
        matches!(
            event,
            BleEvent::StateChanged { state: ConnectionState::Ready | ConnectionState::Disconnected, .. }
        )
    };
    manager.run_for(Duration::from_secs(CONNECT_WAIT_SECS), print_event, settled);

    if manager.connection_state(&address) == Some(ConnectionState::Ready) {
        info!("Holding connection to {} for {}s", address, config.connection.hold_secs);
        manager.run_for(config.hold_duration(), print_event, |_| false);
    }

    manager.teardown(&address);
    // Let the disconnect request reach the adapter
    manager.run_for(Duration::from_millis(500), print_event, |_| false);

    Ok(())
}

fn print_event(event: &BleEvent) {
    if let Some(err) = event.as_error() {
        warn!("{}", err);
    }
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Cannot encode event: {}", e),
    }
}

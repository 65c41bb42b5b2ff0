//! btleplug platform backend
//!
//! Drives a real adapter through btleplug. Every request is spawned onto the
//! tokio runtime and answers later as a [`PlatformEvent`] on the dispatcher
//! queue, so no call here waits on the radio.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use crossbeam_channel::Sender;
use futures::stream::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{GattPlatform, PlatformError, PlatformEvent, ScanPlatform};
use crate::ble::constants::*;
use crate::ble::types::{GattService, ProfileState, ScanObservation, ScanOptions};

/// Give up on a connect request after this long
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// AD type for manufacturer specific data
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

const ZERO_ADDRESS: &str = "00:00:00:00:00:00";

/// Open connection to a peripheral
#[derive(Debug)]
pub struct BtleplugHandle {
    address: String,
    peripheral: Peripheral,
}

/// Platform backed by the first btleplug adapter
#[derive(Clone)]
pub struct BtleplugPlatform {
    runtime: Handle,
    adapter: Option<Adapter>,
    permission: bool,
    events: Sender<PlatformEvent>,
    scan: ScanSequencer,
    /// Peripherals seen while scanning, by reported address
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
}

impl BtleplugPlatform {
    /// Open the first adapter. Must be called from inside a tokio runtime.
    ///
    /// A missing adapter or denied permission is not an error here; it is
    /// reported through `adapter_enabled` / `has_permission` so the scan
    /// controller can surface it.
    pub async fn new(events: Sender<PlatformEvent>) -> Result<Self, PlatformError> {
        let runtime = Handle::current();
        let mut platform = Self {
            runtime,
            adapter: None,
            permission: true,
            events,
            scan: ScanSequencer::default(),
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        };

        let adapters = match Manager::new().await {
            Ok(manager) => manager.adapters().await,
            Err(e) => Err(e),
        };
        let adapters = match adapters {
            Ok(adapters) => adapters,
            Err(btleplug::Error::PermissionDenied) => {
                warn!("Bluetooth permission denied by the operating system");
                platform.permission = false;
                return Ok(platform);
            }
            Err(e) => return Err(PlatformError::Rejected(e.to_string())),
        };

        match adapters.into_iter().next() {
            Some(adapter) => {
                match adapter.adapter_info().await {
                    Ok(info) => info!("Using Bluetooth adapter: {}", info),
                    Err(e) => debug!("Adapter info unavailable: {}", e),
                }
                platform.spawn_link_watcher(adapter.clone());
                platform.adapter = Some(adapter);
            }
            None => warn!("No Bluetooth adapters found"),
        }

        Ok(platform)
    }

    /// Report links dropped by the peer
    fn spawn_link_watcher(&self, adapter: Adapter) {
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot watch adapter events: {}", e);
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    let Some(address) = address_of(&adapter, &id).await else {
                        continue;
                    };
                    debug!("Link to {} dropped", address);
                    let _ = events.send(PlatformEvent::ConnectionStateChanged {
                        address,
                        status: GATT_REMOTE_TERMINATED,
                        new_state: ProfileState::Disconnected,
                    });
                }
            }
        });
    }
}

impl ScanPlatform for BtleplugPlatform {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn adapter_enabled(&self) -> bool {
        self.adapter.is_some()
    }

    fn start_scan(&self, options: &ScanOptions) -> Result<(), PlatformError> {
        let adapter = self.adapter.clone().ok_or(PlatformError::NoAdapter)?;

        // btleplug has no scan mode knob; the mode only matters on stacks that do
        debug!("Scan mode {:?} requested", options.mode);
        let filter = ScanFilter {
            services: options.filter.services.clone(),
        };
        let events = self.events.clone();
        let peripherals = Arc::clone(&self.peripherals);
        forget_all(&peripherals);

        self.scan.replace(&self.runtime, move |token| {
            run_scan(adapter, filter, events, peripherals, token)
        });
        Ok(())
    }

    fn stop_scan(&self) {
        if self.scan.cancel() {
            debug!("Scan stop requested");
        }
    }
}

impl GattPlatform for BtleplugPlatform {
    type Handle = BtleplugHandle;

    fn connect(&self, address: &str) -> Result<BtleplugHandle, PlatformError> {
        let peripheral = self
            .peripherals
            .lock()
            .ok()
            .and_then(|known| known.get(address).cloned())
            .ok_or_else(|| PlatformError::UnknownDevice(address.to_string()))?;

        let events = self.events.clone();
        let target = peripheral.clone();
        let address = address.to_string();
        let reported = address.clone();

        self.runtime.spawn(async move {
            let timeout = Duration::from_secs(CONNECT_TIMEOUT_SECS);
            let (status, new_state) = match tokio::time::timeout(timeout, target.connect()).await {
                Ok(Ok(())) => (GATT_SUCCESS, ProfileState::Connected),
                Ok(Err(e)) => {
                    warn!("Connect to {} failed: {}", reported, e);
                    (GATT_ERROR, ProfileState::Disconnected)
                }
                Err(_) => {
                    warn!("Connect to {} timed out", reported);
                    (GATT_CONNECTION_TIMEOUT, ProfileState::Disconnected)
                }
            };
            let _ = events.send(PlatformEvent::ConnectionStateChanged {
                address: reported,
                status,
                new_state,
            });
        });

        Ok(BtleplugHandle {
            address,
            peripheral,
        })
    }

    fn discover_services(&self, handle: &BtleplugHandle) -> Result<(), PlatformError> {
        let events = self.events.clone();
        let peripheral = handle.peripheral.clone();
        let address = handle.address.clone();
        debug!("Discovering services on {}", address);

        self.runtime.spawn(async move {
            match peripheral.discover_services().await {
                Ok(()) => {
                    let services: Vec<GattService> = peripheral
                        .services()
                        .iter()
                        .map(|service| GattService {
                            uuid: service.uuid,
                            characteristics: service
                                .characteristics
                                .iter()
                                .map(|c| c.uuid)
                                .collect(),
                        })
                        .collect();
                    let _ = events.send(PlatformEvent::ServicesDiscovered { address, services });
                }
                Err(e) => {
                    warn!("Service discovery on {} failed: {}", address, e);
                    let _ = events.send(PlatformEvent::ConnectionStateChanged {
                        address,
                        status: GATT_ERROR,
                        new_state: ProfileState::Disconnected,
                    });
                }
            }
        });
        Ok(())
    }

    fn close(&self, handle: BtleplugHandle) {
        let BtleplugHandle { address, peripheral } = handle;
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Disconnect from {} reported: {}", address, e);
            }
        });
    }
}

struct ScanTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs at most one scan task at a time.
///
/// A replacement task waits for its predecessor to finish, including the
/// predecessor's `stop_scan` on the adapter, before it touches the radio.
#[derive(Clone, Default)]
struct ScanSequencer {
    current: Arc<Mutex<Option<ScanTask>>>,
}

impl ScanSequencer {
    fn slot(&self) -> MutexGuard<'_, Option<ScanTask>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Cancel the running task and queue `run` behind it
    fn replace<F, Fut>(&self, runtime: &Handle, run: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot();
        let previous = slot.take();
        if let Some(task) = &previous {
            task.token.cancel();
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = runtime.spawn(async move {
            if let Some(task) = previous {
                if let Err(e) = task.handle.await {
                    warn!("Previous scan task ended abnormally: {}", e);
                }
            }
            if task_token.is_cancelled() {
                return;
            }
            run(task_token).await;
        });
        *slot = Some(ScanTask { token, handle });
    }

    /// Cancel the running task; it stays queued so a later start waits for it
    fn cancel(&self) -> bool {
        match self.slot().as_ref() {
            Some(task) if !task.token.is_cancelled() => {
                task.token.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Why a scan loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    Cancelled,
    StreamClosed,
}

impl ScanEnd {
    /// A closed adapter stream means results stopped without a `stop` request
    fn failure(self) -> Option<PlatformEvent> {
        match self {
            ScanEnd::Cancelled => None,
            ScanEnd::StreamClosed => Some(PlatformEvent::ScanFailed {
                code: SCAN_FAILED_INTERNAL_ERROR,
            }),
        }
    }
}

/// Wait for the next advertising peripheral. Cancellation wins over
/// pending stream items.
async fn next_advertisement<S>(
    stream: &mut S,
    token: &CancellationToken,
) -> Result<PeripheralId, ScanEnd>
where
    S: Stream<Item = CentralEvent> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ScanEnd::Cancelled),
            event = stream.next() => match event {
                None => return Err(ScanEnd::StreamClosed),
                Some(CentralEvent::DeviceDiscovered(id))
                | Some(CentralEvent::DeviceUpdated(id))
                | Some(CentralEvent::ManufacturerDataAdvertisement { id, .. })
                | Some(CentralEvent::ServiceDataAdvertisement { id, .. })
                | Some(CentralEvent::ServicesAdvertisement { id, .. }) => return Ok(id),
                Some(_) => {}
            },
        }
    }
}

/// Body of one scan: start the radio, forward results until cancelled or the
/// adapter stream closes, then stop the radio.
async fn run_scan(
    adapter: Adapter,
    filter: ScanFilter,
    events: Sender<PlatformEvent>,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    token: CancellationToken,
) {
    let mut stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Cannot subscribe to adapter events: {}", e);
            let _ = events.send(PlatformEvent::ScanFailed {
                code: SCAN_FAILED_INTERNAL_ERROR,
            });
            return;
        }
    };
    if let Err(e) = adapter.start_scan(filter).await {
        error!("Cannot start scan: {}", e);
        let _ = events.send(PlatformEvent::ScanFailed {
            code: scan_failure_code(&e),
        });
        return;
    }

    let end = loop {
        let id = match next_advertisement(&mut stream, &token).await {
            Ok(id) => id,
            Err(end) => break end,
        };
        match observe(&adapter, &id).await {
            Ok(Some((observation, peripheral))) => {
                if let Ok(mut known) = peripherals.lock() {
                    known.insert(observation.address.clone(), peripheral);
                }
                let _ = events.send(PlatformEvent::ScanResult(observation));
            }
            Ok(None) => {}
            Err(e) => debug!("Cannot read peripheral properties: {}", e),
        }
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }
    if let Some(failure) = end.failure() {
        error!("Adapter event stream closed while scanning");
        let _ = events.send(failure);
    }
    debug!("Scan task finished ({:?})", end);
}

/// Drop every peripheral remembered from earlier scans
fn forget_all<T>(known: &Mutex<HashMap<String, T>>) {
    match known.lock() {
        Ok(mut known) => known.clear(),
        Err(poisoned) => poisoned.into_inner().clear(),
    }
}

/// Read a peripheral's properties into an observation
async fn observe(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<(ScanObservation, Peripheral)>, btleplug::Error> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    let address = display_address(&properties.address.to_string(), id);
    let mut observation = ScanObservation {
        address,
        name: properties.local_name,
        rssi: properties.rssi,
        payload: encode_manufacturer_data(&properties.manufacturer_data),
        last_seen: SystemTime::now(),
    };
    if observation.name.as_deref() == Some("") {
        observation.name = None;
    }
    Ok(Some((observation, peripheral)))
}

async fn address_of(adapter: &Adapter, id: &PeripheralId) -> Option<String> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    Some(display_address(&properties.address.to_string(), id))
}

/// Some stacks hide the hardware address; fall back to the platform id
fn display_address(address: &str, id: &PeripheralId) -> String {
    if address == ZERO_ADDRESS {
        format!("{:?}", id)
    } else {
        address.to_string()
    }
}

/// Rebuild manufacturer data as advertisement structures:
/// `len, 0xFF, company id (LE), data...`, ordered by company id.
fn encode_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let mut companies: Vec<&u16> = data.keys().collect();
    companies.sort();

    let mut payload = Vec::new();
    for company in companies {
        let bytes = &data[company];
        // Length byte covers type + company id + data
        let Ok(len) = u8::try_from(bytes.len() + 3) else {
            continue;
        };
        payload.push(len);
        payload.push(AD_TYPE_MANUFACTURER_DATA);
        payload.extend_from_slice(&company.to_le_bytes());
        payload.extend_from_slice(bytes);
    }
    payload
}

fn scan_failure_code(err: &btleplug::Error) -> i32 {
    match err {
        btleplug::Error::PermissionDenied => SCAN_FAILED_APPLICATION_REGISTRATION_FAILED,
        btleplug::Error::NotSupported(_) => SCAN_FAILED_FEATURE_UNSUPPORTED,
        _ => SCAN_FAILED_INTERNAL_ERROR,
    }
}

//! BlueZ radio backend.
//!
//! Uses `bluer` to talk to `bluetoothd` over D-Bus. Discovery runs with an LE
//! transport filter on the service UUID and duplicate reporting enabled, so
//! every fresh advertisement from a known device is re-reported with its new
//! RSSI. Updates are accumulated into batches of `batch_window` before being
//! posted to the session worker.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Feature, Type as AdvertisementType};
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, ErrorKind, Session,
};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{
    advertise_failure, scan_failure, AdapterState, AdvertiseRequest, EventSink, Radio,
    RadioError, RadioEvent, RadioResult, ScanHit, ScanParams,
};

impl From<bluer::Error> for RadioError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            ErrorKind::NotAuthorized | ErrorKind::NotPermitted => Self::PermissionDenied,
            ErrorKind::NotReady => Self::AdapterDisabled,
            ErrorKind::NotSupported => Self::Unsupported {
                feature: "operation",
            },
            _ => Self::Platform {
                message: err.to_string(),
            },
        }
    }
}

fn advertise_failure_code(err: &bluer::Error) -> i32 {
    match err.kind {
        ErrorKind::InvalidLength => advertise_failure::DATA_TOO_LARGE,
        ErrorKind::AlreadyExists => advertise_failure::ALREADY_STARTED,
        ErrorKind::NotSupported => advertise_failure::FEATURE_UNSUPPORTED,
        ErrorKind::Failed if err.message.contains("Maximum") => {
            advertise_failure::TOO_MANY_ADVERTISERS
        }
        _ => advertise_failure::INTERNAL_ERROR,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn advertising_slots(free: u8, active: u8) -> u16 {
    u16::from(free) + u16::from(active)
}

// ============================================================================
// Sleep inhibitor
// ============================================================================

const LOGIND_DESTINATION: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const LOGIND_MANAGER: &str = "org.freedesktop.login1.Manager";

/// Ask logind to block sleep and idle until the returned descriptor is closed.
async fn inhibit_sleep() -> zbus::Result<OwnedFd> {
    let connection = zbus::Connection::system().await?;
    let reply = connection
        .call_method(
            Some(LOGIND_DESTINATION),
            LOGIND_PATH,
            Some(LOGIND_MANAGER),
            "Inhibit",
            // what, who, why, mode
            &("sleep:idle", "proxitag", "Scanning for nearby devices", "block"),
        )
        .await?;
    let fd: zbus::zvariant::OwnedFd = reply.body().deserialize()?;
    Ok(fd.into())
}

/// Holds at most one logind inhibitor descriptor.
#[derive(Debug, Default)]
struct SleepInhibitor {
    fd: Mutex<Option<OwnedFd>>,
}

impl SleepInhibitor {
    fn is_held(&self) -> bool {
        lock(&self.fd).is_some()
    }

    /// Store `fd` unless one is already held. Returns whether it was stored.
    fn hold(&self, fd: OwnedFd) -> bool {
        let mut slot = lock(&self.fd);
        if slot.is_some() {
            return false;
        }
        *slot = Some(fd);
        true
    }

    /// Close the held descriptor. Returns whether one was held.
    fn release(&self) -> bool {
        lock(&self.fd).take().is_some()
    }
}

#[derive(Default)]
struct AdvertisementSlot {
    /// Generation of the request whose handle may be stored; 0 when none.
    generation: u64,
    handle: Option<AdvertisementHandle>,
}

/// [`Radio`] backed by BlueZ.
pub struct BluezRadio {
    _session: Session,
    adapter: Option<Adapter>,
    events: EventSink,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    advertisement: Arc<Mutex<AdvertisementSlot>>,
    inhibitor: SleepInhibitor,
}

impl BluezRadio {
    /// Connect to `bluetoothd` and select an adapter.
    ///
    /// A missing adapter is not an error here; it is reported through
    /// [`Radio::adapter_state`] so the session can surface it to the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the D-Bus session to `bluetoothd` cannot be opened.
    pub async fn new(events: EventSink, adapter_name: Option<&str>) -> RadioResult<Self> {
        let session = Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name).ok(),
            None => session.default_adapter().await.ok(),
        };
        match &adapter {
            Some(adapter) => info!(adapter = %adapter.name(), "Using Bluetooth adapter"),
            None => warn!("No Bluetooth adapter available"),
        }

        Ok(Self {
            _session: session,
            adapter,
            events,
            scan_task: Mutex::new(None),
            advertisement: Arc::new(Mutex::new(AdvertisementSlot::default())),
            inhibitor: SleepInhibitor::default(),
        })
    }

    fn adapter(&self) -> RadioResult<&Adapter> {
        self.adapter.as_ref().ok_or(RadioError::AdapterNotFound)
    }
}

#[async_trait]
impl Radio for BluezRadio {
    async fn permissions_granted(&self) -> bool {
        // bluetoothd applies D-Bus policy per call; refusals come back from
        // start_scan/start_advertising as PermissionDenied.
        true
    }

    async fn adapter_state(&self) -> AdapterState {
        let Ok(adapter) = self.adapter() else {
            return AdapterState::Missing;
        };
        match adapter.is_powered().await {
            Ok(true) => AdapterState::Enabled,
            Ok(false) => AdapterState::Disabled,
            Err(e) => {
                warn!(error = %e, "Failed to read adapter power state");
                AdapterState::Missing
            }
        }
    }

    async fn scanner_available(&self) -> bool {
        self.adapter.is_some()
    }

    async fn advertiser_available(&self) -> bool {
        let Ok(adapter) = self.adapter() else {
            return false;
        };
        // SupportedInstances counts free slots; a slot we hold ourselves is
        // released before re-advertising.
        let free = adapter.supported_advertising_instances().await;
        let active = adapter.active_advertising_instances().await;
        match (free, active) {
            (Ok(free), Ok(active)) => advertising_slots(free, active) > 0,
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to read advertising instances");
                false
            }
        }
    }

    async fn start_scan(&self, params: &ScanParams) -> RadioResult<()> {
        let adapter = self.adapter()?;
        let filter = DiscoveryFilter {
            uuids: HashSet::from([params.service_uuid]),
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        };
        adapter.set_discovery_filter(filter).await?;
        let updates = adapter.discover_devices_with_changes().await?;

        let task = tokio::spawn(deliver_batches(
            adapter.clone(),
            updates,
            self.events.clone(),
            params.batch_window,
        ));
        if let Some(previous) = lock(&self.scan_task).replace(task) {
            previous.abort();
        }
        debug!(mode = ?params.mode, "BlueZ discovery started");
        Ok(())
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        // Dropping the discovery stream inside the task ends discovery.
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
        Ok(())
    }

    async fn start_advertising(&self, request: AdvertiseRequest) -> RadioResult<()> {
        let adapter = self.adapter()?.clone();
        let AdvertiseRequest {
            generation,
            service_uuid,
            service_data,
            connectable,
            include_device_name,
            tx_power_dbm,
            interval,
        } = request;

        let advertisement = Advertisement {
            advertisement_type: if connectable {
                AdvertisementType::Peripheral
            } else {
                AdvertisementType::Broadcast
            },
            service_uuids: BTreeSet::from([service_uuid]),
            service_data: BTreeMap::from([(service_uuid, service_data)]),
            system_includes: if include_device_name {
                BTreeSet::from([Feature::LocalName])
            } else {
                BTreeSet::new()
            },
            local_name: None,
            tx_power: Some(tx_power_dbm),
            min_interval: Some(interval),
            max_interval: Some(interval),
            ..Default::default()
        };

        let previous = {
            let mut slot = lock(&self.advertisement);
            slot.generation = generation;
            slot.handle.take()
        };
        drop(previous);

        let slot = Arc::clone(&self.advertisement);
        let events = self.events.clone();
        tokio::spawn(async move {
            match adapter.advertise(advertisement).await {
                Ok(handle) => {
                    let stale = {
                        let mut slot = lock(&slot);
                        if slot.generation == generation {
                            slot.handle = Some(handle);
                            None
                        } else {
                            Some(handle)
                        }
                    };
                    match stale {
                        None => events.post(RadioEvent::AdvertiseStarted { generation }),
                        Some(handle) => {
                            debug!(generation, "Withdrawing superseded advertisement");
                            drop(handle);
                        }
                    }
                }
                Err(err) => {
                    warn!(generation, error = %err, "BlueZ refused advertisement");
                    events.post(RadioEvent::AdvertiseFailed {
                        generation,
                        code: advertise_failure_code(&err),
                    });
                }
            }
        });
        Ok(())
    }

    async fn stop_advertising(&self) -> RadioResult<()> {
        let handle = {
            let mut slot = lock(&self.advertisement);
            slot.generation = 0;
            slot.handle.take()
        };
        drop(handle);
        Ok(())
    }

    async fn acquire_wake_lock(&self) -> RadioResult<()> {
        if self.inhibitor.is_held() {
            return Ok(());
        }
        let fd = inhibit_sleep().await.map_err(|e| RadioError::Platform {
            message: format!("logind refused sleep inhibitor: {e}"),
        })?;
        if self.inhibitor.hold(fd) {
            debug!("Holding logind sleep inhibitor");
        }
        Ok(())
    }

    async fn release_wake_lock(&self) {
        if self.inhibitor.release() {
            debug!("Released logind sleep inhibitor");
        }
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
    }
}

async fn deliver_batches(
    adapter: Adapter,
    updates: impl Stream<Item = AdapterEvent> + Send + 'static,
    events: EventSink,
    window: Duration,
) {
    let mut updates = Box::pin(updates);
    let mut ticker = tokio::time::interval(window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Vec<ScanHit> = Vec::new();

    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(AdapterEvent::DeviceAdded(address)) => {
                    if let Some(hit) = read_hit(&adapter, address).await {
                        pending.push(hit);
                    }
                }
                Some(_) => {}
                None => {
                    warn!("BlueZ discovery stream ended");
                    events.post(RadioEvent::ScanFailed {
                        code: scan_failure::INTERNAL_ERROR,
                    });
                    break;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    events.post(RadioEvent::ScanResults(std::mem::take(&mut pending)));
                }
            }
        }
    }
}

/// Read the current properties of a reported device. Devices without an RSSI
/// (cached, not currently heard) are skipped.
async fn read_hit(adapter: &Adapter, address: Address) -> Option<ScanHit> {
    let device = adapter.device(address).ok()?;
    let rssi = device.rssi().await.ok().flatten()?;
    let name = device.name().await.ok().flatten();
    let service_data = device.service_data().await.ok().flatten().unwrap_or_default();
    Some(ScanHit {
        address: Some(address.to_string()),
        name,
        service_data,
        rssi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_fd() -> OwnedFd {
        OwnedFd::from(tempfile::tempfile().unwrap())
    }

    #[test]
    fn test_inhibitor_keeps_first_descriptor() {
        let inhibitor = SleepInhibitor::default();
        assert!(!inhibitor.is_held());

        assert!(inhibitor.hold(open_fd()));
        assert!(!inhibitor.hold(open_fd()));
        assert!(inhibitor.is_held());
    }

    #[test]
    fn test_inhibitor_release_is_idempotent() {
        let inhibitor = SleepInhibitor::default();
        assert!(!inhibitor.release());

        inhibitor.hold(open_fd());
        assert!(inhibitor.release());
        assert!(!inhibitor.release());
        assert!(!inhibitor.is_held());
    }

    #[test]
    fn test_own_advertisement_counts_as_available_slot() {
        assert_eq!(advertising_slots(0, 1), 1);
        assert_eq!(advertising_slots(0, 0), 0);
        assert_eq!(advertising_slots(u8::MAX, u8::MAX), 510);
    }

    #[test]
    fn test_permission_errors_map_to_permission_denied() {
        let err = bluer::Error {
            kind: ErrorKind::NotPermitted,
            message: "denied".to_string(),
        };
        assert_eq!(RadioError::from(err), RadioError::PermissionDenied);
    }

    #[test]
    fn test_advertise_failure_codes() {
        let too_many = bluer::Error {
            kind: ErrorKind::Failed,
            message: "Maximum advertisements reached".to_string(),
        };
        assert_eq!(
            advertise_failure_code(&too_many),
            advertise_failure::TOO_MANY_ADVERTISERS
        );

        let too_large = bluer::Error {
            kind: ErrorKind::InvalidLength,
            message: String::new(),
        };
        assert_eq!(
            advertise_failure_code(&too_large),
            advertise_failure::DATA_TOO_LARGE
        );
    }
}

//! Simulated radio for tests and hardware-free development.
//!
//! Preconditions are scriptable, every call is counted, and scan hits are
//! injected with [`MockRadio::deliver`]. With auto-confirm enabled (the
//! default) every advertising request is confirmed immediately through the
//! event sink, as a healthy stack would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::{
    AdapterState, AdvertiseRequest, EventSink, Radio, RadioError, RadioEvent, RadioResult,
    ScanHit, ScanParams,
};
use crate::identifier::{encode, SERVICE_UUID};

/// A simulated peer advertising an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    /// Hardware address.
    pub address: String,
    /// Optional device name.
    pub name: Option<String>,
    /// Identifier placed in service data.
    pub advertised_id: String,
    /// Reported RSSI.
    pub rssi: i16,
}

impl MockDevice {
    /// Build a device advertising `id` at `rssi`.
    #[must_use]
    pub fn new(address: &str, id: &str, rssi: i16) -> Self {
        Self {
            address: address.to_string(),
            name: None,
            advertised_id: id.to_string(),
            rssi,
        }
    }

    /// The scan hit this device produces.
    #[must_use]
    pub fn hit(&self) -> ScanHit {
        ScanHit {
            address: Some(self.address.clone()),
            name: self.name.clone(),
            service_data: HashMap::from([(SERVICE_UUID, encode(&self.advertised_id))]),
            rssi: self.rssi,
        }
    }
}

#[derive(Debug)]
struct MockState {
    permissions_granted: bool,
    adapter: AdapterState,
    scanner_available: bool,
    advertiser_available: bool,
    auto_confirm: bool,
    scan_error: Option<RadioError>,
    advertise_error: Option<RadioError>,
    fail_stops: bool,
    wake_lock_error: Option<RadioError>,

    scan: Option<ScanParams>,
    advertisement: Option<AdvertiseRequest>,
    scan_starts: usize,
    scan_stops: usize,
    advertise_starts: usize,
    wake_lock_held: bool,
    wake_lock_acquisitions: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            permissions_granted: true,
            adapter: AdapterState::Enabled,
            scanner_available: true,
            advertiser_available: true,
            auto_confirm: true,
            scan_error: None,
            advertise_error: None,
            fail_stops: false,
            wake_lock_error: None,
            scan: None,
            advertisement: None,
            scan_starts: 0,
            scan_stops: 0,
            advertise_starts: 0,
            wake_lock_held: false,
            wake_lock_acquisitions: 0,
        }
    }
}

/// In-process [`Radio`] implementation.
#[derive(Debug)]
pub struct MockRadio {
    events: EventSink,
    state: Mutex<MockState>,
}

impl MockRadio {
    /// Create a healthy radio posting into `events`.
    #[must_use]
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            state: Mutex::new(MockState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    /// Grant or revoke radio permission.
    pub fn set_permissions_granted(&self, granted: bool) {
        self.lock().permissions_granted = granted;
    }

    /// Set the adapter power state.
    pub fn set_adapter_state(&self, adapter: AdapterState) {
        self.lock().adapter = adapter;
    }

    /// Toggle scanner availability.
    pub fn set_scanner_available(&self, available: bool) {
        self.lock().scanner_available = available;
    }

    /// Toggle advertiser availability.
    pub fn set_advertiser_available(&self, available: bool) {
        self.lock().advertiser_available = available;
    }

    /// Confirm advertising requests automatically.
    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.lock().auto_confirm = auto_confirm;
    }

    /// Make the next `start_scan` fail synchronously.
    pub fn fail_next_scan(&self, error: RadioError) {
        self.lock().scan_error = Some(error);
    }

    /// Make the next `start_advertising` fail synchronously.
    pub fn fail_next_advertise(&self, error: RadioError) {
        self.lock().advertise_error = Some(error);
    }

    /// Make the next `acquire_wake_lock` fail.
    pub fn fail_next_wake_lock(&self, error: RadioError) {
        self.lock().wake_lock_error = Some(error);
    }

    /// Make every stop call return an error.
    pub fn set_fail_stops(&self, fail: bool) {
        self.lock().fail_stops = fail;
    }

    // ========================================================================
    // Platform callbacks
    // ========================================================================

    /// Deliver a batch of hits, as the platform's scan callback would.
    pub fn deliver(&self, hits: Vec<ScanHit>) {
        self.events.post(RadioEvent::ScanResults(hits));
    }

    /// Report an asynchronous scan failure.
    pub fn report_scan_failure(&self, code: i32) {
        self.events.post(RadioEvent::ScanFailed { code });
    }

    /// Confirm the pending advertisement. Returns its generation.
    pub fn confirm_advertising(&self) -> Option<u64> {
        let generation = self.lock().advertisement.as_ref()?.generation;
        self.events.post(RadioEvent::AdvertiseStarted { generation });
        Some(generation)
    }

    /// Reject the pending advertisement with `code`. Returns its generation.
    pub fn reject_advertising(&self, code: i32) -> Option<u64> {
        let generation = self.lock().advertisement.take()?.generation;
        self.events
            .post(RadioEvent::AdvertiseFailed { generation, code });
        Some(generation)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Parameters of the running scan.
    #[must_use]
    pub fn active_scan(&self) -> Option<ScanParams> {
        self.lock().scan.clone()
    }

    /// The currently registered advertising request.
    #[must_use]
    pub fn active_advertisement(&self) -> Option<AdvertiseRequest> {
        self.lock().advertisement.clone()
    }

    /// Number of accepted `start_scan` calls.
    #[must_use]
    pub fn scan_starts(&self) -> usize {
        self.lock().scan_starts
    }

    /// Number of `stop_scan` calls.
    #[must_use]
    pub fn scan_stops(&self) -> usize {
        self.lock().scan_stops
    }

    /// Number of accepted `start_advertising` calls.
    #[must_use]
    pub fn advertise_starts(&self) -> usize {
        self.lock().advertise_starts
    }

    /// Whether the wake lock is held.
    #[must_use]
    pub fn wake_lock_held(&self) -> bool {
        self.lock().wake_lock_held
    }

    /// How many times the wake lock went from released to held.
    #[must_use]
    pub fn wake_lock_acquisitions(&self) -> usize {
        self.lock().wake_lock_acquisitions
    }

    // ========================================================================
    // Simulation
    // ========================================================================

    /// Emit a batch containing every device each `period` while a scan runs.
    pub fn spawn_simulation(
        self: &Arc<Self>,
        devices: Vec<MockDevice>,
        period: Duration,
    ) -> JoinHandle<()> {
        let radio = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if radio.active_scan().is_some() {
                    radio.deliver(devices.iter().map(MockDevice::hit).collect());
                }
            }
        })
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn permissions_granted(&self) -> bool {
        self.lock().permissions_granted
    }

    async fn adapter_state(&self) -> AdapterState {
        self.lock().adapter
    }

    async fn scanner_available(&self) -> bool {
        self.lock().scanner_available
    }

    async fn advertiser_available(&self) -> bool {
        self.lock().advertiser_available
    }

    async fn start_scan(&self, params: &ScanParams) -> RadioResult<()> {
        let mut state = self.lock();
        if let Some(error) = state.scan_error.take() {
            return Err(error);
        }
        state.scan = Some(params.clone());
        state.scan_starts += 1;
        Ok(())
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        let mut state = self.lock();
        state.scan_stops += 1;
        state.scan = None;
        if state.fail_stops {
            return Err(RadioError::Platform {
                message: "scan was not registered".to_string(),
            });
        }
        Ok(())
    }

    async fn start_advertising(&self, request: AdvertiseRequest) -> RadioResult<()> {
        let generation = request.generation;
        let auto_confirm = {
            let mut state = self.lock();
            if let Some(error) = state.advertise_error.take() {
                return Err(error);
            }
            state.advertisement = Some(request);
            state.advertise_starts += 1;
            state.auto_confirm
        };
        if auto_confirm {
            self.events.post(RadioEvent::AdvertiseStarted { generation });
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> RadioResult<()> {
        let mut state = self.lock();
        state.advertisement = None;
        if state.fail_stops {
            return Err(RadioError::Platform {
                message: "advertiser was not registered".to_string(),
            });
        }
        Ok(())
    }

    async fn acquire_wake_lock(&self) -> RadioResult<()> {
        let mut state = self.lock();
        if let Some(error) = state.wake_lock_error.take() {
            return Err(error);
        }
        if !state.wake_lock_held {
            state.wake_lock_held = true;
            state.wake_lock_acquisitions += 1;
        }
        Ok(())
    }

    async fn release_wake_lock(&self) {
        self.lock().wake_lock_held = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::decode;
    use crate::radio::event_channel;

    #[tokio::test]
    async fn test_auto_confirm_posts_started_event() {
        let (sink, mut rx) = event_channel();
        let radio = MockRadio::new(sink);
        let request = AdvertiseRequest {
            generation: 7,
            service_uuid: SERVICE_UUID,
            service_data: encode("me"),
            connectable: false,
            include_device_name: false,
            tx_power_dbm: 1,
            interval: Duration::from_millis(100),
        };
        radio.start_advertising(request).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(RadioEvent::AdvertiseStarted { generation: 7 })
        );
    }

    #[tokio::test]
    async fn test_scripted_scan_failure_is_consumed() {
        let (sink, _rx) = event_channel();
        let radio = MockRadio::new(sink);
        radio.fail_next_scan(RadioError::PermissionDenied);

        let params = ScanParams::default();
        assert_eq!(
            radio.start_scan(&params).await,
            Err(RadioError::PermissionDenied)
        );
        assert!(radio.start_scan(&params).await.is_ok());
        assert_eq!(radio.scan_starts(), 1);
    }

    #[tokio::test]
    async fn test_wake_lock_is_idempotent() {
        let (sink, _rx) = event_channel();
        let radio = MockRadio::new(sink);
        radio.acquire_wake_lock().await.unwrap();
        radio.acquire_wake_lock().await.unwrap();
        assert_eq!(radio.wake_lock_acquisitions(), 1);
        radio.release_wake_lock().await;
        radio.release_wake_lock().await;
        assert!(!radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_scripted_wake_lock_failure_is_consumed() {
        let (sink, _rx) = event_channel();
        let radio = MockRadio::new(sink);
        radio.fail_next_wake_lock(RadioError::PermissionDenied);

        assert_eq!(
            radio.acquire_wake_lock().await,
            Err(RadioError::PermissionDenied)
        );
        assert!(!radio.wake_lock_held());
        radio.acquire_wake_lock().await.unwrap();
        assert!(radio.wake_lock_held());
    }

    #[test]
    fn test_mock_device_hit_carries_identifier() {
        let hit = MockDevice::new("AA:BB", "peer-1", -42).hit();
        assert_eq!(
            hit.service_data_for(&SERVICE_UUID).and_then(decode).as_deref(),
            Some("peer-1")
        );
        assert_eq!(hit.rssi, -42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_only_emits_while_scanning() {
        let (sink, mut rx) = event_channel();
        let radio = Arc::new(MockRadio::new(sink));
        let task = radio.spawn_simulation(
            vec![MockDevice::new("AA", "peer", -60)],
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.try_recv().is_err());

        radio.start_scan(&ScanParams::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(rx.try_recv(), Ok(RadioEvent::ScanResults(hits)) if hits.len() == 1));

        task.abort();
    }
}

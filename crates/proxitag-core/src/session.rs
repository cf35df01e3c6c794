//! Radio session lifecycle.
//!
//! A single worker task owns the radio, the scan processor and the identity
//! store. It serializes user commands (from [`SessionHandle`]) and radio events
//! (from the [`EventSink`](crate::radio::EventSink) the backend posts into), so
//! every write to [`ProximityStore`] happens on one task.
//!
//! Radio events take priority over commands: anything the radio posted before
//! a command was sent is applied before that command runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RadioConfig;
use crate::error::{ProxitagError, Result};
use crate::identifier::{Identifier, SERVICE_UUID};
use crate::identity::IdentityStore;
use crate::processor::ScanProcessor;
use crate::radio::{
    AdapterState, AdvertiseRequest, EventReceiver, Radio, RadioError, RadioEvent, ScanParams,
};
use crate::state::ProximityStore;

const COMMAND_CAPACITY: usize = 32;

/// Radio settings applied to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Scan filter, mode and batch window.
    pub scan: ScanParams,
    /// Advertising transmit power in dBm.
    pub tx_power_dbm: i16,
    /// Advertising interval.
    pub advertise_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RadioConfig::default())
    }
}

impl From<&RadioConfig> for SessionSettings {
    fn from(config: &RadioConfig) -> Self {
        Self {
            scan: config.scan_params(),
            tx_power_dbm: config.tx_power_dbm,
            advertise_interval: config.advertise_interval(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Refresh(oneshot::Sender<()>),
    SetOwnIdentifier(String, oneshot::Sender<Result<Identifier>>),
    SetTargetIdentifier(String, oneshot::Sender<Identifier>),
    ClearDevices(oneshot::Sender<()>),
}

/// Cloneable handle for sending commands to the session worker.
///
/// Each call resolves once the worker has applied the command. Failures of
/// the radio itself are reported through the store's status message, not as
/// errors here.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    store: ProximityStore,
}

impl SessionHandle {
    /// The observable state this session writes to.
    #[must_use]
    pub const fn store(&self) -> &ProximityStore {
        &self.store
    }

    /// Start scanning and advertising.
    ///
    /// # Errors
    ///
    /// Returns [`ProxitagError::SessionClosed`] if the worker has exited.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Stop scanning and advertising. Safe to call at any time.
    ///
    /// # Errors
    ///
    /// Returns [`ProxitagError::SessionClosed`] if the worker has exited.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Re-evaluate advertising without touching the scan.
    ///
    /// # Errors
    ///
    /// Returns [`ProxitagError::SessionClosed`] if the worker has exited.
    pub async fn refresh(&self) -> Result<()> {
        self.request(Command::Refresh).await
    }

    /// Persist a new own identifier and re-advertise it if a session is running.
    /// Returns the canonical identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier cannot be persisted or the worker
    /// has exited.
    pub async fn set_own_identifier(&self, value: &str) -> Result<Identifier> {
        let value = value.to_string();
        self.request(|reply| Command::SetOwnIdentifier(value, reply))
            .await?
    }

    /// Select the identifier to look for. Returns the canonical identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProxitagError::SessionClosed`] if the worker has exited.
    pub async fn set_target_identifier(&self, value: &str) -> Result<Identifier> {
        let value = value.to_string();
        self.request(|reply| Command::SetTargetIdentifier(value, reply))
            .await
    }

    /// Forget every observed device.
    ///
    /// # Errors
    ///
    /// Returns [`ProxitagError::SessionClosed`] if the worker has exited.
    pub async fn clear_devices(&self) -> Result<()> {
        self.request(Command::ClearDevices).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ProxitagError::SessionClosed)?;
        response.await.map_err(|_| ProxitagError::SessionClosed)
    }
}

/// Advertising progress. Only the request whose generation matches may be
/// confirmed or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Advertising {
    Idle,
    Pending { id: Identifier, generation: u64 },
    Active { id: Identifier, generation: u64 },
}

/// The session worker.
pub struct SessionController {
    radio: Arc<dyn Radio>,
    store: ProximityStore,
    processor: ScanProcessor,
    identity: IdentityStore,
    settings: SessionSettings,
    advertising: Advertising,
    generation: u64,
}

impl SessionController {
    /// Load the own identifier into `store` and spawn the worker.
    ///
    /// `events` must be the receiver paired with the sink `radio` posts into.
    /// The worker stops the session and exits once every handle is dropped.
    #[must_use]
    pub fn spawn(
        radio: Arc<dyn Radio>,
        events: EventReceiver,
        store: ProximityStore,
        identity: IdentityStore,
        settings: SessionSettings,
    ) -> (SessionHandle, JoinHandle<()>) {
        let controller = Self {
            radio,
            processor: ScanProcessor::new(store.clone()),
            store: store.clone(),
            identity,
            settings,
            advertising: Advertising::Idle,
            generation: 0,
        };
        controller.load_own_identifier();

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let worker = tokio::spawn(controller.run(command_rx, events));
        (SessionHandle { commands, store }, worker)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: EventReceiver) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        self.stop().await;
        info!("Session worker exited");
    }

    fn load_own_identifier(&self) {
        match self.identity.get_or_create() {
            Ok(id) => {
                info!(own_id = %id, "Loaded own identifier");
                self.store.set_own_id(id);
            }
            Err(err) => {
                warn!(path = %self.identity.path().display(), error = %err, "Failed to load own identifier");
                self.store.set_message(Some(err.to_string()));
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::Start(reply) => {
                self.start().await;
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Refresh(reply) => {
                self.refresh().await;
                let _ = reply.send(());
            }
            Command::SetOwnIdentifier(value, reply) => {
                let result = self.set_own_identifier(&value).await;
                let _ = reply.send(result);
            }
            Command::SetTargetIdentifier(value, reply) => {
                let id = self.set_target_identifier(&value);
                let _ = reply.send(id);
            }
            Command::ClearDevices(reply) => {
                self.store.clear_devices();
                let _ = reply.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::ScanResults(hits) => {
                if self.store.is_scanning() {
                    self.processor.process_batch(hits);
                } else {
                    debug!(hits = hits.len(), "Dropping scan batch; not scanning");
                }
            }
            RadioEvent::ScanFailed { code } => {
                if !self.store.is_scanning() {
                    debug!(code, "Ignoring scan failure; not scanning");
                    return;
                }
                warn!(code, "Scan failed; ending session");
                self.processor.handle_scan_error(code);
                self.stop().await;
            }
            RadioEvent::AdvertiseStarted { generation } => match self.pending_id(generation) {
                Some(id) => {
                    info!(own_id = %id, generation, "Advertising started");
                    self.advertising = Advertising::Active { id, generation };
                    self.store.set_advertising(true);
                }
                None => debug!(generation, "Ignoring stale advertising confirmation"),
            },
            RadioEvent::AdvertiseFailed { generation, code } => {
                if self.pending_id(generation).is_some() {
                    self.fail_advertising(ProxitagError::AdvertiseFailed(code))
                        .await;
                } else {
                    debug!(generation, code, "Ignoring stale advertising failure");
                }
            }
        }
    }

    fn pending_id(&self, generation: u64) -> Option<Identifier> {
        match &self.advertising {
            Advertising::Pending {
                id,
                generation: pending,
            } if *pending == generation => Some(id.clone()),
            _ => None,
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    async fn start(&mut self) {
        if self.store.is_scanning() {
            debug!("Session already running");
            return;
        }
        self.processor.reset();

        if let Err(err) = self.check_scan_preconditions().await {
            warn!(error = %err, "Session not started");
            self.store.set_message(Some(err.to_string()));
            return;
        }

        if let Err(err) = self.radio.acquire_wake_lock().await {
            warn!(error = %err, "Scanning without a wake lock");
        }
        if let Err(err) = self.radio.start_scan(&self.settings.scan).await {
            let err = ProxitagError::from(err);
            warn!(error = %err, "Failed to start scan");
            self.store.set_message(Some(err.to_string()));
            self.stop().await;
            return;
        }

        self.store.set_scanning(true);
        self.store.set_message(None);
        info!(batch_window = ?self.settings.scan.batch_window, "Proximity session started");
        self.start_advertising().await;
    }

    async fn stop(&mut self) {
        if let Err(err) = self.radio.stop_scan().await {
            debug!(error = %err, "Ignoring scan stop failure");
        }
        let was_scanning = self.store.is_scanning();
        self.store.set_scanning(false);
        self.processor.reset();
        self.stop_advertising().await;
        self.radio.release_wake_lock().await;
        if was_scanning {
            info!("Proximity session stopped");
        }
    }

    async fn refresh(&mut self) {
        if self.store.is_scanning() {
            self.start_advertising().await;
        } else {
            self.stop_advertising().await;
        }
    }

    async fn set_own_identifier(&mut self, value: &str) -> Result<Identifier> {
        let id = self.identity.set(value)?;
        info!(own_id = %id, "Own identifier updated");
        self.store.set_own_id(id.clone());
        self.refresh().await;
        Ok(id)
    }

    fn set_target_identifier(&mut self, value: &str) -> Identifier {
        let id = Identifier::new(value);
        if id != self.store.target_id() {
            info!(target = %id, "Target identifier updated");
            self.store.set_target_id(id.clone());
            self.processor.reset();
        }
        id
    }

    async fn check_scan_preconditions(&self) -> Result<()> {
        if !self.radio.permissions_granted().await {
            return Err(ProxitagError::PermissionDenied);
        }
        self.check_adapter().await?;
        if !self.radio.scanner_available().await {
            return Err(ProxitagError::ScannerUnavailable);
        }
        Ok(())
    }

    async fn check_adapter(&self) -> Result<()> {
        match self.radio.adapter_state().await {
            AdapterState::Missing => Err(ProxitagError::AdapterNotFound),
            AdapterState::Disabled => Err(ProxitagError::AdapterDisabled),
            AdapterState::Enabled => Ok(()),
        }
    }

    // ========================================================================
    // Advertising
    // ========================================================================

    async fn check_advertise_preconditions(&self, own_id: &Identifier) -> Result<()> {
        if !self.radio.permissions_granted().await {
            return Err(ProxitagError::AdvertisePermissionDenied);
        }
        self.check_adapter().await?;
        if !self.radio.advertiser_available().await {
            return Err(ProxitagError::AdvertiserUnavailable);
        }
        if own_id.is_empty() {
            return Err(ProxitagError::OwnIdentifierMissing);
        }
        Ok(())
    }

    async fn start_advertising(&mut self) {
        let own_id = self.store.own_id();
        if let Err(err) = self.check_advertise_preconditions(&own_id).await {
            self.fail_advertising(err).await;
            return;
        }
        if let Advertising::Active { id, .. } = &self.advertising {
            if *id == own_id {
                debug!(own_id = %own_id, "Already advertising this identifier");
                return;
            }
        }
        if self.advertising != Advertising::Idle {
            self.stop_advertising().await;
        }

        self.generation += 1;
        let generation = self.generation;
        let request = AdvertiseRequest {
            generation,
            service_uuid: SERVICE_UUID,
            service_data: own_id.to_payload(),
            connectable: false,
            include_device_name: false,
            tx_power_dbm: self.settings.tx_power_dbm,
            interval: self.settings.advertise_interval,
        };
        debug!(own_id = %own_id, generation, "Requesting advertisement");
        self.advertising = Advertising::Pending {
            id: own_id,
            generation,
        };

        if let Err(err) = self.radio.start_advertising(request).await {
            let err = match err {
                RadioError::PermissionDenied => ProxitagError::AdvertisePermissionDenied,
                RadioError::Unsupported { .. } => ProxitagError::AdvertiserUnavailable,
                other => other.into(),
            };
            self.fail_advertising(err).await;
        }
    }

    async fn stop_advertising(&mut self) {
        if self.advertising != Advertising::Idle {
            debug!("Stopping advertisement");
        }
        if let Err(err) = self.radio.stop_advertising().await {
            debug!(error = %err, "Ignoring advertising stop failure");
        }
        self.advertising = Advertising::Idle;
        self.store.set_advertising(false);
    }

    async fn fail_advertising(&mut self, err: ProxitagError) {
        warn!(error = %err, "Advertising unavailable");
        self.store.set_message(Some(err.to_string()));
        self.stop_advertising().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::encode;
    use crate::radio::mock::{MockDevice, MockRadio};
    use crate::radio::{event_channel, EventSink};
    use crate::state::{ProximityEvent, ProximitySnapshot};
    use tempfile::TempDir;

    const TARGET: &str = "BLE-2024";

    struct Harness {
        handle: SessionHandle,
        radio: Arc<MockRadio>,
        sink: EventSink,
        store: ProximityStore,
        worker: JoinHandle<()>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let identity = IdentityStore::new(dir.path().join("identity.json"));
        identity.set("me").unwrap();

        let (sink, events) = event_channel();
        let radio = Arc::new(MockRadio::new(sink.clone()));
        let store = ProximityStore::new();
        let (handle, worker) = SessionController::spawn(
            radio.clone(),
            events,
            store.clone(),
            identity,
            SessionSettings::default(),
        );
        Harness {
            handle,
            radio,
            sink,
            store,
            worker,
            _dir: dir,
        }
    }

    async fn settle(store: &ProximityStore, predicate: impl FnMut(&ProximitySnapshot) -> bool) {
        let mut rx = store.subscribe();
        let reached = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("state was not reached")
            .is_ok();
        assert!(reached);
    }

    /// Round-trip a no-op command so every event posted before it is applied.
    async fn flush(h: &Harness) {
        let target = h.store.target_id();
        h.handle.set_target_identifier(target.as_str()).await.unwrap();
    }

    #[tokio::test]
    async fn test_own_identifier_loaded_at_spawn() {
        let h = harness();
        assert_eq!(h.store.own_id().as_str(), "me");
    }

    #[tokio::test]
    async fn test_start_scans_and_advertises() {
        let h = harness();
        h.handle.start().await.unwrap();
        settle(&h.store, |s| s.advertising).await;

        let snapshot = h.store.snapshot();
        assert!(snapshot.scanning);
        assert_eq!(snapshot.message, None);

        let scan = h.radio.active_scan().unwrap();
        assert_eq!(scan.service_uuid, SERVICE_UUID);

        let advert = h.radio.active_advertisement().unwrap();
        assert_eq!(advert.service_uuid, SERVICE_UUID);
        assert_eq!(advert.service_data, encode("me"));
        assert!(!advert.connectable);
        assert!(!advert.include_device_name);
        assert!(h.radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.handle.start().await.unwrap();
        assert_eq!(h.radio.scan_starts(), 1);
        assert_eq!(h.radio.wake_lock_acquisitions(), 1);
    }

    #[tokio::test]
    async fn test_stop_twice_is_safe() {
        let h = harness();
        h.handle.start().await.unwrap();

        h.handle.stop().await.unwrap();
        assert!(!h.store.snapshot().scanning);

        h.radio.set_fail_stops(true);
        h.handle.stop().await.unwrap();
        let snapshot = h.store.snapshot();
        assert!(!snapshot.scanning);
        assert!(!snapshot.advertising);
        assert!(!h.radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_safe() {
        let h = harness();
        h.handle.stop().await.unwrap();
        assert!(!h.store.snapshot().scanning);
        assert_eq!(h.store.snapshot().message, None);
    }

    #[tokio::test]
    async fn test_start_without_permission() {
        let h = harness();
        h.radio.set_permissions_granted(false);
        h.handle.start().await.unwrap();

        let snapshot = h.store.snapshot();
        assert!(!snapshot.scanning);
        assert_eq!(
            snapshot.message.as_deref(),
            Some("Bluetooth scan permission is required.")
        );
        assert_eq!(h.radio.scan_starts(), 0);
        assert!(!h.radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_start_reports_each_hardware_cause() {
        let h = harness();

        h.radio.set_adapter_state(AdapterState::Missing);
        h.handle.start().await.unwrap();
        assert_eq!(
            h.store.snapshot().message.as_deref(),
            Some("Bluetooth is not supported on this device.")
        );

        h.radio.set_adapter_state(AdapterState::Disabled);
        h.handle.start().await.unwrap();
        assert_eq!(
            h.store.snapshot().message.as_deref(),
            Some("Bluetooth is turned off.")
        );

        h.radio.set_adapter_state(AdapterState::Enabled);
        h.radio.set_scanner_available(false);
        h.handle.start().await.unwrap();
        assert_eq!(
            h.store.snapshot().message.as_deref(),
            Some("BLE scanner is not available.")
        );
        assert!(!h.store.snapshot().scanning);
    }

    #[tokio::test]
    async fn test_scan_start_refusal_ends_session() {
        let h = harness();
        h.radio.fail_next_scan(RadioError::PermissionDenied);
        h.handle.start().await.unwrap();

        let snapshot = h.store.snapshot();
        assert!(!snapshot.scanning);
        assert_eq!(
            snapshot.message.as_deref(),
            Some("Bluetooth scan permission is required.")
        );
        assert!(!h.radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_advertise_rejection_keeps_scanning() {
        let h = harness();
        h.radio.set_auto_confirm(false);
        h.handle.start().await.unwrap();
        assert!(h.radio.reject_advertising(2).is_some());
        flush(&h).await;

        let snapshot = h.store.snapshot();
        assert!(snapshot.scanning);
        assert!(!snapshot.advertising);
        assert_eq!(snapshot.message.as_deref(), Some("Advertising failed: 2"));
    }

    #[tokio::test]
    async fn test_advertise_permission_refusal() {
        let h = harness();
        h.radio.fail_next_advertise(RadioError::PermissionDenied);
        h.handle.start().await.unwrap();

        let snapshot = h.store.snapshot();
        assert!(snapshot.scanning);
        assert!(!snapshot.advertising);
        assert_eq!(
            snapshot.message.as_deref(),
            Some("Bluetooth advertise permission is required.")
        );
    }

    #[tokio::test]
    async fn test_advertiser_unavailable_keeps_scanning() {
        let h = harness();
        h.radio.set_advertiser_available(false);
        h.handle.start().await.unwrap();

        let snapshot = h.store.snapshot();
        assert!(snapshot.scanning);
        assert!(!snapshot.advertising);
        assert_eq!(
            snapshot.message.as_deref(),
            Some("BLE advertising is not supported.")
        );
        assert_eq!(h.radio.advertise_starts(), 0);
        assert!(h.radio.active_scan().is_some());
    }

    #[tokio::test]
    async fn test_wake_lock_refusal_does_not_block_scanning() {
        let h = harness();
        h.radio.fail_next_wake_lock(RadioError::Platform {
            message: "no logind".to_string(),
        });
        h.handle.start().await.unwrap();
        settle(&h.store, |s| s.advertising).await;

        let snapshot = h.store.snapshot();
        assert!(snapshot.scanning);
        assert_eq!(snapshot.message, None);
        assert!(!h.radio.wake_lock_held());

        h.handle.stop().await.unwrap();
        h.handle.start().await.unwrap();
        assert!(h.radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_late_confirmation_after_stop_is_ignored() {
        let h = harness();
        h.radio.set_auto_confirm(false);
        h.handle.start().await.unwrap();
        let generation = h.radio.active_advertisement().unwrap().generation;

        h.handle.stop().await.unwrap();
        h.sink.post(RadioEvent::AdvertiseStarted { generation });
        flush(&h).await;

        let snapshot = h.store.snapshot();
        assert!(!snapshot.advertising);
        assert!(!snapshot.scanning);
    }

    #[tokio::test]
    async fn test_superseded_confirmation_is_ignored() {
        let h = harness();
        h.radio.set_auto_confirm(false);
        h.handle.start().await.unwrap();
        let first = h.radio.active_advertisement().unwrap().generation;

        h.handle.set_own_identifier("second").await.unwrap();
        h.sink.post(RadioEvent::AdvertiseStarted { generation: first });
        flush(&h).await;
        assert!(!h.store.snapshot().advertising);

        assert!(h.radio.confirm_advertising().is_some());
        settle(&h.store, |s| s.advertising).await;
    }

    #[tokio::test]
    async fn test_refresh_with_same_identifier_is_noop() {
        let h = harness();
        h.handle.start().await.unwrap();
        settle(&h.store, |s| s.advertising).await;

        h.handle.refresh().await.unwrap();
        h.handle.set_own_identifier(" me ").await.unwrap();
        assert_eq!(h.radio.advertise_starts(), 1);
        assert!(h.store.snapshot().advertising);
    }

    #[tokio::test]
    async fn test_new_own_identifier_is_readvertised() {
        let h = harness();
        h.handle.start().await.unwrap();
        settle(&h.store, |s| s.advertising).await;

        let id = h.handle.set_own_identifier(" new id!").await.unwrap();
        assert_eq!(id.as_str(), "newid");
        settle(&h.store, |s| s.advertising && s.own_id.as_str() == "newid").await;

        assert_eq!(h.radio.advertise_starts(), 2);
        assert_eq!(
            h.radio.active_advertisement().unwrap().service_data,
            encode("newid")
        );
    }

    #[tokio::test]
    async fn test_blank_own_identifier_refuses_advertising() {
        let h = harness();
        let id = h.handle.set_own_identifier("!!!").await.unwrap();
        assert!(id.is_empty());

        h.handle.start().await.unwrap();
        let snapshot = h.store.snapshot();
        assert!(snapshot.scanning);
        assert!(!snapshot.advertising);
        assert_eq!(
            snapshot.message.as_deref(),
            Some("Set your own identifier before advertising.")
        );
        assert_eq!(h.radio.advertise_starts(), 0);
    }

    #[tokio::test]
    async fn test_refresh_while_stopped_withdraws_advertising() {
        let h = harness();
        h.handle.refresh().await.unwrap();
        assert!(h.radio.active_advertisement().is_none());
        assert_eq!(h.radio.advertise_starts(), 0);
    }

    #[tokio::test]
    async fn test_scan_failure_ends_session() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.radio.report_scan_failure(3);
        flush(&h).await;

        let snapshot = h.store.snapshot();
        assert!(!snapshot.scanning);
        assert!(!snapshot.advertising);
        assert_eq!(snapshot.message.as_deref(), Some("Scan failed: 3"));
        assert!(!h.radio.wake_lock_held());
    }

    #[tokio::test]
    async fn test_batches_after_stop_are_dropped() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.handle.stop().await.unwrap();

        h.radio.deliver(vec![MockDevice::new("AA", "peer", -40).hit()]);
        flush(&h).await;
        assert!(h.store.snapshot().devices.is_empty());
    }

    #[tokio::test]
    async fn test_clear_devices() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.radio.deliver(vec![
            MockDevice::new("AA", "a", -40).hit(),
            MockDevice::new("BB", "b", -70).hit(),
        ]);
        settle(&h.store, |s| s.devices.len() == 2).await;

        h.handle.clear_devices().await.unwrap();
        assert!(h.store.snapshot().devices.is_empty());
        assert!(h.store.snapshot().scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_is_tagged_through_session() {
        let h = harness();
        let mut events = h.store.events();
        h.handle.set_target_identifier(TARGET).await.unwrap();
        h.handle.start().await.unwrap();

        h.radio.deliver(vec![MockDevice::new("AA", TARGET, -45).hit()]);
        settle(&h.store, |s| s.target_rssi == Some(-45)).await;

        tokio::time::advance(Duration::from_millis(2100)).await;
        h.radio.deliver(vec![MockDevice::new("AA", TARGET, -47).hit()]);
        settle(&h.store, |s| s.tagged).await;

        assert!(matches!(
            events.try_recv(),
            Ok(ProximityEvent::Tagged { rssi: -47, .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_change_while_tagged_resets() {
        let h = harness();
        h.handle.set_target_identifier(TARGET).await.unwrap();
        h.handle.start().await.unwrap();
        h.radio.deliver(vec![MockDevice::new("AA", TARGET, -40).hit()]);
        settle(&h.store, |s| s.target_rssi.is_some()).await;
        tokio::time::advance(Duration::from_millis(2000)).await;
        h.radio.deliver(vec![MockDevice::new("AA", TARGET, -40).hit()]);
        settle(&h.store, |s| s.tagged).await;

        let id = h.handle.set_target_identifier("other one").await.unwrap();
        assert_eq!(id.as_str(), "otherone");
        let snapshot = h.store.snapshot();
        assert!(!snapshot.tagged);
        assert_eq!(snapshot.target_rssi, None);
        assert_eq!(snapshot.target_id.as_str(), "otherone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_tag() {
        let h = harness();
        h.handle.set_target_identifier(TARGET).await.unwrap();
        h.handle.start().await.unwrap();
        h.radio.deliver(vec![MockDevice::new("AA", TARGET, -40).hit()]);
        settle(&h.store, |s| s.target_rssi.is_some()).await;
        tokio::time::advance(Duration::from_millis(2000)).await;
        h.radio.deliver(vec![MockDevice::new("AA", TARGET, -40).hit()]);
        settle(&h.store, |s| s.tagged).await;

        h.handle.stop().await.unwrap();
        let snapshot = h.store.snapshot();
        assert!(!snapshot.tagged);
        assert_eq!(snapshot.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_worker_reports_session_closed() {
        let h = harness();
        h.worker.abort();
        let _ = h.worker.await;

        let err = h.handle.start().await.unwrap_err();
        assert!(matches!(err, ProxitagError::SessionClosed));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_session() {
        let Harness {
            handle,
            radio,
            store,
            worker,
            ..
        } = harness();
        handle.start().await.unwrap();
        assert!(radio.wake_lock_held());

        drop(handle);
        worker.await.unwrap();

        assert!(!store.snapshot().scanning);
        assert!(!radio.wake_lock_held());
    }
}

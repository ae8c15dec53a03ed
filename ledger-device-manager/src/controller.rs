// SPDX-License-Identifier: Apache-2.0

//! Device state controller

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use ledger_transport::{CancellationToken, Device, DeviceAction, HotplugTransport, Subscription};
use log::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::errors::{ErrorCause, InitializeCancelled, LedgerError, LedgerErrorCode, ProbeTimeout};
use crate::listener::{DeviceUpdateHandler, HotplugListener};
use crate::registry::DeviceRegistry;
use crate::state::{readiness, HardwareWalletState, LedgerState, Phase};

#[derive(Default)]
struct Record {
    phase: Phase,
    is_supported: Option<bool>,
    device_paths: Vec<String>,
    registry: DeviceRegistry,
    listener: Option<Arc<HotplugListener>>,
    subscription: Option<Subscription>,
    error: Option<LedgerError>,
}

fn paths(registry: &DeviceRegistry) -> Vec<String> {
    registry.all().iter().map(|d| d.path.clone()).collect()
}

impl Record {
    fn is_ready(&self) -> Option<bool> {
        readiness(self.phase, self.is_supported, self.error.as_ref())
    }

    /// A failed probe step: support is withdrawn and the cause recorded
    fn downgrade(&mut self, code: LedgerErrorCode, cause: ErrorCause) {
        self.is_supported = Some(false);
        self.error = Some(LedgerError::from_cause(code, cause));
    }

    fn cancel(&mut self) {
        self.error = Some(LedgerError::new(
            LedgerErrorCode::Cancelled,
            InitializeCancelled,
        ));
    }

    /// Drop the hotplug subscription, if any
    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    /// Whether `source` is the listener this record currently subscribes through
    fn is_current(&self, source: &HotplugListener) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| std::ptr::eq(Arc::as_ptr(listener), source))
    }

    fn apply(&mut self, device: Device, action: DeviceAction) {
        info!(
            "[device-manager]:update_devices:start action={} device={:?} devices={:?}",
            action,
            device,
            paths(&self.registry)
        );

        match action {
            DeviceAction::Add => {
                let path = device.path.clone();
                if let Some(previous) = self.registry.insert(device) {
                    debug!("[device-manager]:update_devices replaced {:?}", previous);
                }
                info!("[device-manager]:update_devices {} {}", path, LedgerState::PluggedIn);
            }
            DeviceAction::Remove => {
                self.registry.remove_by_path(&device.path);
            }
        }

        info!(
            "[device-manager]:update_devices:end action={} devices={:?}",
            action,
            paths(&self.registry)
        );
    }

    fn snapshot(&self) -> HardwareWalletState {
        HardwareWalletState {
            phase: self.phase,
            is_initialized: self.phase.is_initialized(),
            is_supported: self.is_supported,
            is_ready: self.is_ready(),
            device_paths: self.device_paths.clone(),
            devices: self.registry.all().to_vec(),
            is_listening: self.subscription.is_some(),
            error: self.error.clone(),
        }
    }
}

#[derive(Default)]
struct Shared {
    record: RwLock<Record>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceUpdateHandler for Shared {
    fn update_devices(&self, source: &HotplugListener, device: Device, action: DeviceAction) {
        // checked under the write lock: `release` takes the same lock, so a
        // stopped listener can no longer get an event through
        let mut record = self.write();
        let live = record.is_current(source)
            && source.is_listening()
            && matches!(record.phase, Phase::ProbingDevices | Phase::Listening);
        if !live {
            debug!(
                "[device-manager]:update_devices dropped {} {} from a released listener",
                action, device.path
            );
            return;
        }
        record.apply(device, action);
    }

    fn stream_ended(&self, source: &HotplugListener, error: LedgerError) {
        let mut record = self.write();
        if !record.is_current(source)
            || !matches!(record.phase, Phase::ProbingDevices | Phase::Listening)
        {
            debug!("[device-manager]:stream_ended ignored in {:?}", record.phase);
            return;
        }

        warn!("[device-manager]:stream_ended {}", error);
        record.error = Some(error);
        // while still initializing, the end of initialize does the cleanup
        if record.phase == Phase::Listening {
            record.phase = Phase::Failed;
            record.release();
        }
    }
}

enum ProbeFailure {
    Failed(ErrorCause),
    Cancelled,
}

/// Tracks whether a usable Ledger transport is available and which devices
/// are plugged in.
///
/// Consumers read the derived readiness and the registry snapshot; only the
/// hotplug listener and [`update_devices`](Self::update_devices) mutate the
/// registry.
pub struct DeviceManager<T: HotplugTransport> {
    transport: T,
    config: ManagerConfig,
    shared: Arc<Shared>,
}

impl<T: HotplugTransport> DeviceManager<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ManagerConfig::default())
    }

    pub fn with_config(transport: T, config: ManagerConfig) -> Self {
        let shared = Arc::new(Shared::default());
        info!("[device-manager]:new {:?}", shared.read().snapshot());
        Self {
            transport,
            config,
            shared,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Run the probe sequence and, when the transport is usable, subscribe
    /// to hotplug events.
    ///
    /// Never fails: every problem ends up in [`error`](Self::error) and keeps
    /// [`is_ready`](Self::is_ready) false. Calling it again releases the
    /// previous subscription and starts over from a fresh record.
    pub async fn initialize(&self) {
        self.initialize_with_cancel(&CancellationToken::new()).await
    }

    /// [`initialize`](Self::initialize), abandoned as soon as `cancel` fires
    pub async fn initialize_with_cancel(&self, cancel: &CancellationToken) {
        {
            let mut record = self.shared.write();
            record.release();
            *record = Record {
                phase: Phase::ProbingSupport,
                ..Record::default()
            };
        }
        info!("[device-manager]:initialize:start");

        let step = self.probe(cancel, self.transport.is_supported()).await;
        let supported = {
            let mut record = self.shared.write();
            match step {
                Ok(supported) => record.is_supported = Some(supported),
                Err(ProbeFailure::Failed(cause)) => {
                    record.downgrade(LedgerErrorCode::NotSupported, cause)
                }
                Err(ProbeFailure::Cancelled) => record.cancel(),
            }
            let supported = record.is_supported == Some(true) && record.error.is_none();
            if supported {
                record.phase = Phase::ProbingDevices;
            }
            supported
        };

        let listen = if supported {
            let step = self.probe(cancel, self.transport.list()).await;
            let mut record = self.shared.write();
            match step {
                Ok(device_paths) => record.device_paths = device_paths,
                Err(ProbeFailure::Failed(cause)) => {
                    record.downgrade(LedgerErrorCode::UnableToListDevicePaths, cause)
                }
                Err(ProbeFailure::Cancelled) => record.cancel(),
            }
            record.is_supported == Some(true) && record.error.is_none()
        } else {
            false
        };

        if listen {
            self.subscribe();
        }

        let mut record = self.shared.write();
        let phase = match (record.is_supported, record.error.is_some()) {
            (Some(true), false) => Phase::Listening,
            (_, true) => Phase::Failed,
            _ => Phase::Unsupported,
        };
        record.phase = phase;
        if record.phase != Phase::Listening {
            record.release();
        }

        info!("[device-manager]:initialize:end {:?}", record.snapshot());
    }

    fn subscribe(&self) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handler: Weak<dyn DeviceUpdateHandler> = weak;
        let listener = HotplugListener::new(handler);

        // registered before subscribing so events delivered from inside
        // `listen` are recognised as coming from the current listener
        self.shared.write().listener = Some(listener.clone());
        let result = listener.start(&self.transport);

        let mut record = self.shared.write();
        match result {
            Ok(subscription) => record.subscription = Some(subscription),
            Err(e) => {
                warn!("[device-manager]:initialize subscribe failed: {}", e);
                record.listener = None;
                record.error = Some(LedgerError::new(LedgerErrorCode::ListenerFailed, e));
            }
        }
    }

    /// Await one probe step, bounded by the configured timeout and `cancel`
    async fn probe<R, F>(&self, cancel: &CancellationToken, step: F) -> Result<R, ProbeFailure>
    where
        F: Future<Output = Result<R, T::Error>>,
    {
        let limit = self.config.probe_timeout();
        let bounded = async move {
            match limit {
                Some(after) => match tokio::time::timeout(after, step).await {
                    Ok(result) => result.map_err(|e| Arc::new(e) as ErrorCause),
                    Err(_) => Err(Arc::new(ProbeTimeout { after }) as ErrorCause),
                },
                None => step.await.map_err(|e| Arc::new(e) as ErrorCause),
            }
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(ProbeFailure::Cancelled),
            result = bounded => result.map_err(ProbeFailure::Failed),
        }
    }

    /// Apply one hotplug event to the registry.
    ///
    /// `Add` replaces any entry with the same path; removing an unknown path
    /// does nothing.
    pub fn update_devices(&self, device: Device, action: DeviceAction) {
        self.shared.write().apply(device, action);
    }

    /// Release the hotplug subscription. Readiness is `false` afterwards.
    pub fn shutdown(&self) {
        let mut record = self.shared.write();
        if !record.phase.is_initialized() {
            debug!("[device-manager]:shutdown before initialization, nothing to release");
            return;
        }
        record.release();
        record.phase = Phase::Stopped;
        info!("[device-manager]:shutdown {:?}", record.snapshot());
    }

    /// `None` until initialization completes
    pub fn is_ready(&self) -> Option<bool> {
        self.shared.read().is_ready()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.read().phase.is_initialized()
    }

    pub fn is_supported(&self) -> Option<bool> {
        self.shared.read().is_supported
    }

    pub fn phase(&self) -> Phase {
        self.shared.read().phase
    }

    pub fn error(&self) -> Option<LedgerError> {
        self.shared.read().error.clone()
    }

    /// Connected devices in arrival order
    pub fn devices(&self) -> Arc<Vec<Device>> {
        self.shared.read().registry.all()
    }

    /// Paths reported by the enumeration probe during initialization
    pub fn device_paths(&self) -> Vec<String> {
        self.shared.read().device_paths.clone()
    }

    pub fn state(&self) -> HardwareWalletState {
        self.shared.read().snapshot()
    }
}

impl<T: HotplugTransport> Drop for DeviceManager<T> {
    fn drop(&mut self) {
        self.shared.write().release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ledger_transport::HotplugEvent;

    use super::*;
    use crate::errors::StreamCompleted;
    use crate::testing::{device, MockError, MockTransport};

    fn manager(
        transport: MockTransport,
    ) -> (DeviceManager<Arc<MockTransport>>, Arc<MockTransport>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = Arc::new(transport);
        (DeviceManager::new(transport.clone()), transport)
    }

    #[test]
    fn test_new_manager_is_not_initialized() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));

        assert!(!manager.is_initialized());
        assert_eq!(manager.is_ready(), None);
        assert_eq!(manager.is_supported(), None);
        assert_eq!(manager.phase(), Phase::NotStarted);
        assert!(manager.devices().is_empty());
        assert_eq!(transport.support_calls(), 0);
    }

    #[tokio::test]
    async fn test_support_check_failure() {
        let (manager, transport) = manager(MockTransport::support_failing("HID unavailable"));

        manager.initialize().await;

        let error = manager.error().unwrap();
        assert_eq!(error.code(), LedgerErrorCode::NotSupported);
        assert_eq!(error.message().to_string(), "HID unavailable");
        assert_eq!(
            error.message().downcast_ref::<MockError>(),
            Some(&MockError("HID unavailable".to_string()))
        );
        assert!(manager.is_initialized());
        assert_eq!(manager.is_supported(), Some(false));
        assert_eq!(manager.is_ready(), Some(false));
        assert!(manager.devices().is_empty());
        assert_eq!(manager.phase(), Phase::Failed);
        assert_eq!(transport.list_calls(), 0);
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure_downgrades_support() {
        let (manager, transport) = manager(MockTransport::list_failing("enumeration failed"));

        manager.initialize().await;

        let error = manager.error().unwrap();
        assert_eq!(error.code(), LedgerErrorCode::UnableToListDevicePaths);
        assert_eq!(error.message().to_string(), "enumeration failed");
        assert_eq!(manager.is_supported(), Some(false));
        assert_eq!(manager.is_ready(), Some(false));
        assert_eq!(transport.list_calls(), 1);
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_successful_initialization() {
        let (manager, transport) = manager(MockTransport::ready(vec!["usb:1"]));

        manager.initialize().await;

        assert!(manager.error().is_none());
        assert_eq!(manager.is_supported(), Some(true));
        assert_eq!(manager.is_ready(), Some(true));
        assert_eq!(manager.phase(), Phase::Listening);
        assert_eq!(manager.device_paths(), vec!["usb:1".to_string()]);
        assert_eq!(transport.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_platform_is_not_an_error() {
        let (manager, transport) = manager(MockTransport::unsupported());

        manager.initialize().await;

        assert!(manager.error().is_none());
        assert_eq!(manager.is_supported(), Some(false));
        assert_eq!(manager.is_ready(), Some(false));
        assert_eq!(manager.phase(), Phase::Unsupported);
        assert_eq!(transport.list_calls(), 0);
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_registry_filled_by_hotplug_events_only() {
        let (manager, transport) = manager(MockTransport::ready(vec!["usb:1"]));

        manager.initialize().await;
        assert!(manager.devices().is_empty());

        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));

        let devices = manager.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, "usb:1");
        assert_eq!(devices[0].product.as_deref(), Some("Nano S"));
        assert_eq!(manager.is_ready(), Some(true));
    }

    #[tokio::test]
    async fn test_events_applied_in_order() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;

        transport.emit(HotplugEvent::add(device("A", "Nano S")));
        transport.emit(HotplugEvent::add(device("B", "Nano X")));
        transport.emit(HotplugEvent::remove(device("A", "Nano S")));

        let paths: Vec<_> = manager.devices().iter().map(|d| d.path.clone()).collect();
        assert_eq!(paths, vec!["B"]);
    }

    #[tokio::test]
    async fn test_repeated_add_keeps_one_entry() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;

        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));
        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));

        assert_eq!(manager.devices().len(), 1);
    }

    #[test]
    fn test_remove_unknown_path_is_noop() {
        let (manager, _transport) = manager(MockTransport::ready(vec![]));
        manager.update_devices(device("usb:1", "Nano S"), DeviceAction::Add);

        manager.update_devices(Device::with_path("usb:2"), DeviceAction::Remove);
        manager.update_devices(Device::with_path("usb:2"), DeviceAction::Remove);

        assert_eq!(manager.devices().len(), 1);
        assert_eq!(manager.devices()[0].path, "usb:1");
    }

    #[tokio::test]
    async fn test_stream_error_clears_readiness() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;
        assert_eq!(manager.is_ready(), Some(true));

        transport.fail_stream("hid read failed");

        let error = manager.error().unwrap();
        assert_eq!(error.code(), LedgerErrorCode::ListenerFailed);
        assert_eq!(error.message().to_string(), "hid read failed");
        assert_eq!(manager.is_ready(), Some(false));
        assert_eq!(manager.phase(), Phase::Failed);
        assert_eq!(transport.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_stream_complete_clears_readiness() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;

        transport.complete_stream();

        let error = manager.error().unwrap();
        assert_eq!(error.code(), LedgerErrorCode::ListenerCompleted);
        assert!(error.message().downcast_ref::<StreamCompleted>().is_some());
        assert_eq!(manager.is_ready(), Some(false));
    }

    #[tokio::test]
    async fn test_listen_failure() {
        let (manager, transport) =
            manager(MockTransport::ready(vec![]).with_listen_error("no monitor"));

        manager.initialize().await;

        assert_eq!(manager.error().unwrap().code(), LedgerErrorCode::ListenerFailed);
        assert_eq!(manager.is_supported(), Some(true));
        assert_eq!(manager.is_ready(), Some(false));
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_reinitialize_keeps_single_subscription() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));

        manager.initialize().await;
        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));
        manager.initialize().await;

        assert_eq!(transport.subscriptions(), 2);
        assert_eq!(transport.active_subscriptions(), 1);
        assert_eq!(manager.is_ready(), Some(true));
        assert!(manager.devices().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscription() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;
        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));

        manager.shutdown();

        assert_eq!(transport.active_subscriptions(), 0);
        assert_eq!(manager.phase(), Phase::Stopped);
        assert_eq!(manager.is_ready(), Some(false));
        assert!(manager.error().is_none());

        // the stopped listener no longer touches the registry
        transport.emit(HotplugEvent::add(device("usb:2", "Nano X")));
        assert_eq!(manager.devices().len(), 1);
    }

    #[tokio::test]
    async fn test_event_in_flight_during_release_is_dropped() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;

        // hold the record so the delivery passes the listener check and waits
        let record = manager.shared.read();
        let delivery = {
            let transport = transport.clone();
            std::thread::spawn(move || {
                transport.emit(HotplugEvent::add(device("usb:late", "Nano S")));
            })
        };
        std::thread::sleep(Duration::from_millis(50));

        if let Some(listener) = &record.listener {
            listener.stop();
        }
        if let Some(subscription) = &record.subscription {
            subscription.unsubscribe();
        }
        drop(record);

        manager.shutdown();
        delivery.join().unwrap();

        assert_eq!(manager.phase(), Phase::Stopped);
        assert_eq!(transport.active_subscriptions(), 0);
        assert!(manager.devices().is_empty());
    }

    #[tokio::test]
    async fn test_stale_listener_ignored_after_reinitialize() {
        let (manager, _transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;
        let stale = manager.shared.read().listener.clone().unwrap();

        manager.initialize().await;
        manager
            .shared
            .update_devices(&stale, device("usb:old", "Nano S"), DeviceAction::Add);
        manager.shared.stream_ended(
            &stale,
            LedgerError::new(LedgerErrorCode::ListenerFailed, MockError("old".to_string())),
        );

        assert!(manager.devices().is_empty());
        assert!(manager.error().is_none());
        assert_eq!(manager.is_ready(), Some(true));
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        manager.initialize().await;
        assert_eq!(transport.active_subscriptions(), 1);

        drop(manager);

        assert_eq!(transport.active_subscriptions(), 0);
        // events after the owner is gone are dropped quietly
        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));
    }

    #[tokio::test]
    async fn test_cancelled_initialization() {
        let (manager, transport) = manager(MockTransport::ready(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        manager.initialize_with_cancel(&cancel).await;

        assert_eq!(manager.error().unwrap().code(), LedgerErrorCode::Cancelled);
        assert!(manager.is_initialized());
        assert_eq!(manager.is_supported(), None);
        assert_eq!(manager.is_ready(), Some(false));
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport =
            Arc::new(MockTransport::ready(vec![]).with_probe_delay(Duration::from_secs(30)));
        let config = ManagerConfig {
            probe_timeout_ms: Some(20),
        };
        let manager = DeviceManager::with_config(transport.clone(), config);

        manager.initialize().await;

        let error = manager.error().unwrap();
        assert_eq!(error.code(), LedgerErrorCode::NotSupported);
        assert_eq!(
            error.message().downcast_ref::<ProbeTimeout>(),
            Some(&ProbeTimeout {
                after: Duration::from_millis(20)
            })
        );
        assert_eq!(manager.is_ready(), Some(false));
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_state_snapshot() {
        let (manager, transport) = manager(MockTransport::ready(vec!["usb:1"]));
        manager.initialize().await;
        transport.emit(HotplugEvent::add(device("usb:1", "Nano S")));

        let state = manager.state();
        assert!(state.is_initialized);
        assert!(state.is_listening);
        assert_eq!(state.is_ready, Some(true));
        assert_eq!(state.devices.len(), 1);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "listening");
        assert_eq!(json["isReady"], true);
        assert_eq!(json["devices"][0]["product"], "Nano S");
        assert!(json["error"].is_null());
    }
}

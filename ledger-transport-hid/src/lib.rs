mod config;
mod errors;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

pub use config::HidConfig;
pub use errors::LedgerHIDError;
pub use hidapi;
use hidapi::{DeviceInfo, HidApi};
use ledger_transport::{
    async_trait, CancellationToken, Device, HotplugEvent, HotplugObserver, HotplugTransport,
    Subscription, LEDGER_VENDOR_ID,
};
use log::{debug, error, info, trace};
use tokio::time::MissedTickBehavior;

pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;

type SharedApi = Arc<Mutex<Option<HidApi>>>;

/// hidapi-backed discovery and hotplug transport.
///
/// hidapi has no native hotplug notification, so `listen` polls the device
/// list on a dedicated thread and reports the differences between scans.
pub struct TransportHid {
    api: SharedApi,
    config: HidConfig,
}

impl TransportHid {
    pub fn new() -> Self {
        Self::with_config(HidConfig::default())
    }

    pub fn with_config(config: HidConfig) -> Self {
        TransportHid {
            api: Arc::new(Mutex::new(None)),
            config,
        }
    }

    fn is_ledger(dev: &DeviceInfo) -> bool {
        dev.vendor_id() == LEDGER_VENDOR_ID && dev.usage_page() == LEDGER_USAGE_PAGE
    }

    pub fn list_ledgers(api: &HidApi) -> impl Iterator<Item = &DeviceInfo> {
        api.device_list().filter(|dev| Self::is_ledger(dev))
    }

    fn device_from_info(info: &DeviceInfo) -> Device {
        Device {
            path: info.path().to_string_lossy().into_owned(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            serial_number: info.serial_number().map(str::to_string),
            manufacturer: info.manufacturer_string().map(str::to_string),
            product: info.product_string().map(str::to_string),
            release: info.release_number(),
            interface: info.interface_number(),
            usage_page: info.usage_page(),
            usage: info.usage(),
        }
    }

    /// Refresh the HID device list and collect the Ledger devices on it.
    ///
    /// Blocking. The HID context is created on first use and reused after.
    fn scan(api: &SharedApi) -> Result<Vec<Device>, LedgerHIDError> {
        let mut guard = api.lock().unwrap_or_else(PoisonError::into_inner);
        let api = match guard.take() {
            Some(mut api) => {
                api.refresh_devices()?;
                api
            }
            None => HidApi::new()?,
        };
        let api = guard.insert(api);

        let mut seen = HashSet::new();
        let devices: Vec<Device> = Self::list_ledgers(api)
            .map(Self::device_from_info)
            .filter(|device| seen.insert(device.path.clone()))
            .collect();

        trace!("[ledger-hid]:scan found {} device(s)", devices.len());
        Ok(devices)
    }

    /// Events turning `previous` into `current`: removals first, then additions,
    /// each in scan order.
    fn diff(previous: &[Device], current: &[Device]) -> Vec<HotplugEvent> {
        let before: HashSet<&str> = previous.iter().map(|d| d.path.as_str()).collect();
        let after: HashSet<&str> = current.iter().map(|d| d.path.as_str()).collect();

        let removed = previous
            .iter()
            .filter(|d| !after.contains(d.path.as_str()))
            .cloned()
            .map(HotplugEvent::remove);
        let added = current
            .iter()
            .filter(|d| !before.contains(d.path.as_str()))
            .cloned()
            .map(HotplugEvent::add);

        removed.chain(added).collect()
    }

    fn monitor(
        api: SharedApi,
        config: HidConfig,
        observer: Arc<dyn HotplugObserver>,
        shutdown: CancellationToken,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("[ledger-hid]:monitor failed to build runtime: {}", e);
                observer.error(Box::new(e));
                return;
            }
        };

        runtime.block_on(async move {
            let mut known = if config.announce_existing {
                Vec::new()
            } else {
                match Self::scan(&api) {
                    Ok(devices) => devices,
                    Err(e) => {
                        observer.error(Box::new(e));
                        return;
                    }
                }
            };

            let mut interval = tokio::time::interval(config.poll_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!("[ledger-hid]:monitor polling every {:?}", config.poll_interval());

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        debug!("[ledger-hid]:monitor unsubscribed");
                        return;
                    }

                    _ = interval.tick() => {
                        let current = match Self::scan(&api) {
                            Ok(devices) => devices,
                            Err(e) => {
                                error!("[ledger-hid]:monitor scan failed: {}", e);
                                observer.error(Box::new(e));
                                return;
                            }
                        };

                        for event in Self::diff(&known, &current) {
                            if shutdown.is_cancelled() {
                                return;
                            }
                            info!("[ledger-hid]:monitor {} {}", event.action, event.device.path);
                            observer.next(event);
                        }
                        known = current;
                    }
                }
            }
        });
    }
}

impl Default for TransportHid {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HotplugTransport for TransportHid {
    type Error = LedgerHIDError;

    async fn is_supported(&self) -> Result<bool, Self::Error> {
        let api = self.api.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = api.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(HidApi::new()?);
            }
            Ok::<_, LedgerHIDError>(true)
        })
        .await?
    }

    async fn list(&self) -> Result<Vec<String>, Self::Error> {
        let api = self.api.clone();
        let devices = tokio::task::spawn_blocking(move || Self::scan(&api)).await??;
        Ok(devices.into_iter().map(|device| device.path).collect())
    }

    fn listen(&self, observer: Arc<dyn HotplugObserver>) -> Result<Subscription, Self::Error> {
        let token = CancellationToken::new();
        let api = self.api.clone();
        let config = self.config.clone();
        let shutdown = token.clone();

        std::thread::Builder::new()
            .name("ledger-hid-monitor".to_string())
            .spawn(move || Self::monitor(api, config, observer, shutdown))?;

        Ok(Subscription::new(token))
    }
}

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Tuning for the polling hotplug monitor
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HidConfig {
    /// Delay between two scans of the HID device list
    pub poll_interval_ms: u64,
    /// Emit `add` for devices already connected when the subscription starts
    pub announce_existing: bool,
}

impl HidConfig {
    pub fn poll_interval(&self) -> Duration {
        // a zero period would make tokio's interval panic
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            announce_existing: true,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::Deserialize;

/// Manager settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Upper bound for each probe step; unbounded when absent
    pub probe_timeout_ms: Option<u64>,
}

impl ManagerConfig {
    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_ms.map(Duration::from_millis)
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Path-keyed registry of connected devices

use std::sync::Arc;

use ledger_transport::Device;

/// Connected devices in arrival order, at most one entry per path.
///
/// The contents sit behind an `Arc`: snapshots handed out by [`all`](Self::all)
/// are never modified, a mutation swaps in a new list instead.
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    devices: Arc<Vec<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device, replacing any entry with the same path.
    ///
    /// A replaced entry keeps its arrival position. Returns the replaced entry.
    pub fn insert(&mut self, device: Device) -> Option<Device> {
        let devices = Arc::make_mut(&mut self.devices);
        match devices.iter_mut().find(|d| d.path == device.path) {
            Some(slot) => Some(std::mem::replace(slot, device)),
            None => {
                devices.push(device);
                None
            }
        }
    }

    /// Remove every entry with this path; returns how many were removed
    pub fn remove_by_path(&mut self, path: &str) -> usize {
        if !self.contains(path) {
            return 0;
        }
        let devices = Arc::make_mut(&mut self.devices);
        let before = devices.len();
        devices.retain(|d| d.path != path);
        before - devices.len()
    }

    /// Read-only snapshot in arrival order
    pub fn all(&self) -> Arc<Vec<Device>> {
        Arc::clone(&self.devices)
    }

    pub fn get(&self, path: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Device descriptors and the static device model catalog

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ledger USB vendor id
pub const LEDGER_VENDOR_ID: u16 = 0x2c97;

/// One physically connected unit, as reported by the transport.
///
/// Descriptors are immutable: a new add event replaces the whole value.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Transport-assigned endpoint identifier, unique per connected unit
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    /// Model name, e.g. "Nano S"
    pub product: Option<String>,
    pub release: u16,
    pub interface: i32,
    pub usage_page: u16,
    pub usage: u16,
}

impl Device {
    /// Descriptor carrying only a path, used for removals where the
    /// transport no longer has the full device information.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            vendor_id: 0,
            product_id: 0,
            serial_number: None,
            manufacturer: None,
            product: None,
            release: 0,
            interface: 0,
            usage_page: 0,
            usage: 0,
        }
    }

    /// Look up the catalog entry for this device's product id
    pub fn model(&self) -> Option<DeviceModel> {
        DeviceModel::identify(self.product_id)
    }
}

/// Kind of hotplug event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    Add,
    Remove,
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Add => f.write_str("add"),
            DeviceAction::Remove => f.write_str("remove"),
        }
    }
}

/// Static catalog entry describing a device family.
///
/// Informational only; it travels with hotplug events but nothing in the
/// state tracking depends on it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModel {
    pub id: String,
    pub product_name: String,
    /// Upper byte of the USB product id in "MM" firmware mode
    #[serde(rename = "productIdMM")]
    pub product_id_mm: u8,
    pub legacy_usb_product_id: u16,
    pub usb_only: bool,
    pub memory_size: u32,
    pub block_size: u32,
}

// (id, product name, productIdMM, legacy pid, usb only, memory size, block size)
const CATALOG: &[(&str, &str, u8, u16, bool, u32, u32)] = &[
    ("nanoS", "Ledger Nano S", 0x10, 0x0001, true, 320 * 1024, 4 * 1024),
    ("nanoX", "Ledger Nano X", 0x40, 0x0004, false, 2 * 1024 * 1024, 4 * 1024),
    ("nanoSP", "Ledger Nano S Plus", 0x50, 0x0005, true, 1533 * 1024, 32),
    ("stax", "Ledger Stax", 0x60, 0x0006, false, 1533 * 1024, 32),
    ("europa", "Ledger Flex", 0x70, 0x0007, false, 1533 * 1024, 32),
];

impl DeviceModel {
    /// Resolve a USB product id to its model.
    ///
    /// Matches either the legacy product id or the "MM" upper byte.
    pub fn identify(product_id: u16) -> Option<DeviceModel> {
        let mm = (product_id >> 8) as u8;
        CATALOG
            .iter()
            .find(|entry| entry.3 == product_id || (mm != 0 && entry.2 == mm))
            .map(
                |&(id, product_name, product_id_mm, legacy, usb_only, memory_size, block_size)| {
                    DeviceModel {
                        id: id.to_string(),
                        product_name: product_name.to_string(),
                        product_id_mm,
                        legacy_usb_product_id: legacy,
                        usb_only,
                        memory_size,
                        block_size,
                    }
                },
            )
    }
}

/// A single notification from the hotplug stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotplugEvent {
    #[serde(rename = "type")]
    pub action: DeviceAction,
    /// Device path, when the transport reports one separately
    pub descriptor: Option<String>,
    pub device: Device,
    pub device_model: Option<DeviceModel>,
}

impl HotplugEvent {
    pub fn add(device: Device) -> Self {
        Self {
            action: DeviceAction::Add,
            descriptor: Some(device.path.clone()),
            device_model: device.model(),
            device,
        }
    }

    pub fn remove(device: Device) -> Self {
        Self {
            action: DeviceAction::Remove,
            descriptor: Some(device.path.clone()),
            device_model: device.model(),
            device,
        }
    }
}

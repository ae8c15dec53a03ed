// SPDX-License-Identifier: Apache-2.0

//! Ledger Device Manager
//!
//! Tracks, at any moment, whether a usable Ledger transport is available and
//! which devices are plugged in. It sits between a raw transport capability
//! (see [`ledger_transport::HotplugTransport`]) and the rest of an
//! application that only wants to ask "is a signing device ready?".
//!
//! ## Lifecycle
//!
//! 1. **Support probe**: can this platform use the transport at all?
//! 2. **Enumeration probe**: which device paths are connected and unlocked?
//! 3. **Hotplug subscription**: only when both probes succeeded; add/remove
//!    events then keep the device registry current.
//!
//! Readiness is never stored. It is derived from the support flag, the
//! recorded error and the phase, so it cannot drift out of sync with them.
//! Probe and stream failures never propagate as `Err`; they are kept in
//! [`DeviceManager::error`] and surface as a non-ready state.
//!
//! ```no_run
//! use ledger_device_manager::DeviceManager;
//! use ledger_transport::HotplugTransport;
//!
//! async fn report<T: HotplugTransport>(transport: T) {
//!     let manager = DeviceManager::new(transport);
//!     manager.initialize().await;
//!
//!     if manager.is_ready() == Some(true) {
//!         println!("{} device(s) connected", manager.devices().len());
//!     }
//! }
//! ```

pub mod config;
pub mod controller;
pub mod errors;
pub mod listener;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ManagerConfig;
pub use controller::DeviceManager;
pub use errors::*;
pub use listener::{DeviceUpdateHandler, HotplugListener, ListenerState};
pub use registry::DeviceRegistry;
pub use state::{readiness, HardwareWalletState, LedgerState, Phase};

pub use ledger_transport::{CancellationToken, Device, DeviceAction, DeviceModel};

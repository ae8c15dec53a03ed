// SPDX-License-Identifier: Apache-2.0

//! Lifecycle phases and the state snapshot handed to consumers

use std::fmt;

use ledger_transport::Device;
use serde::Serialize;

use crate::errors::LedgerError;

/// Milestones a device passes through on its way to being usable.
///
/// Used as a telemetry label only; the manager tracks readiness, not the
/// individual milestone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    PluggedIn,
    Unlocked,
    /// The expected signing application is running
    Ready,
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerState::PluggedIn => f.write_str("plugged_in"),
            LedgerState::Unlocked => f.write_str("unlocked"),
            LedgerState::Ready => f.write_str("ready"),
        }
    }
}

/// Where the manager is in its probe sequence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    NotStarted,
    ProbingSupport,
    ProbingDevices,
    /// Both probes succeeded and the hotplug subscription is live
    Listening,
    /// The support probe answered `false`
    Unsupported,
    /// A probe, the subscription, or the hotplug stream failed
    Failed,
    /// `shutdown` released the subscription
    Stopped,
}

impl Phase {
    /// Whether the initialization sequence has run to completion
    pub fn is_initialized(&self) -> bool {
        matches!(
            self,
            Phase::Listening | Phase::Unsupported | Phase::Failed | Phase::Stopped
        )
    }
}

/// Readiness derived from the stored facts, never stored itself.
///
/// `None` until initialization completes.
pub fn readiness(
    phase: Phase,
    is_supported: Option<bool>,
    error: Option<&LedgerError>,
) -> Option<bool> {
    if !phase.is_initialized() {
        return None;
    }
    Some(is_supported == Some(true) && error.is_none() && phase != Phase::Stopped)
}

/// Point-in-time copy of everything the manager knows
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareWalletState {
    pub phase: Phase,
    pub is_initialized: bool,
    pub is_supported: Option<bool>,
    pub is_ready: Option<bool>,
    /// Paths reported by the enumeration probe
    pub device_paths: Vec<String>,
    /// Registry contents in arrival order
    pub devices: Vec<Device>,
    /// Whether a hotplug subscription is held
    pub is_listening: bool,
    pub error: Option<LedgerError>,
}

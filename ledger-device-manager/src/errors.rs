// SPDX-License-Identifier: Apache-2.0

//! Error types for the device manager

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Original failure cause, kept as reported by the transport
pub type ErrorCause = Arc<dyn Error + Send + Sync>;

/// Classification of a failure that makes the manager not ready
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorCode {
    /// The support probe failed: the platform cannot use the transport
    NotSupported,
    /// Support was confirmed but listing connected devices failed
    UnableToListDevicePaths,
    /// The hotplug stream could not be started or reported an error
    ListenerFailed,
    /// The hotplug stream ended while the manager was listening
    ListenerCompleted,
    /// Initialization was aborted through its cancellation token
    Cancelled,
}

impl LedgerErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerErrorCode::NotSupported => "not_supported",
            LedgerErrorCode::UnableToListDevicePaths => "unable_to_list_device_paths",
            LedgerErrorCode::ListenerFailed => "listener_failed",
            LedgerErrorCode::ListenerCompleted => "listener_completed",
            LedgerErrorCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LedgerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure together with its untouched cause
#[derive(Clone, Debug, Error, Serialize)]
#[error("{code}: {message}")]
pub struct LedgerError {
    code: LedgerErrorCode,
    #[source]
    #[serde(serialize_with = "serialize_cause")]
    message: ErrorCause,
}

impl LedgerError {
    pub fn new<E>(code: LedgerErrorCode, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            code,
            message: Arc::new(cause),
        }
    }

    pub fn from_cause(code: LedgerErrorCode, cause: ErrorCause) -> Self {
        Self {
            code,
            message: cause,
        }
    }

    pub fn from_boxed(code: LedgerErrorCode, cause: Box<dyn Error + Send + Sync>) -> Self {
        Self {
            code,
            message: Arc::from(cause),
        }
    }

    pub fn code(&self) -> LedgerErrorCode {
        self.code
    }

    /// The cause as the transport reported it
    pub fn message(&self) -> &ErrorCause {
        &self.message
    }

    /// Check if the failure happened while probing the transport
    pub fn is_probe_error(&self) -> bool {
        matches!(
            self.code,
            LedgerErrorCode::NotSupported | LedgerErrorCode::UnableToListDevicePaths
        )
    }

    /// Check if the failure came from the hotplug stream after startup
    pub fn is_listener_error(&self) -> bool {
        matches!(
            self.code,
            LedgerErrorCode::ListenerFailed | LedgerErrorCode::ListenerCompleted
        )
    }
}

fn serialize_cause<S: Serializer>(cause: &ErrorCause, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(cause)
}

/// A probe step did not settle within the configured timeout
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("probe timed out after {after:?}")]
pub struct ProbeTimeout {
    pub after: Duration,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("initialization cancelled")]
pub struct InitializeCancelled;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("hotplug stream completed")]
pub struct StreamCompleted;

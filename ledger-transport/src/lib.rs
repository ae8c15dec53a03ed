// SPDX-License-Identifier: Apache-2.0

//! Transport capability boundary for Ledger devices
//!
//! This crate describes what the device manager needs from a USB/HID
//! backend and nothing more: a support probe, enumeration of connected
//! device paths, and a hotplug subscription delivering add/remove events
//! to an observer.

mod device;
mod subscription;

use std::error::Error;
use std::sync::Arc;

pub use async_trait::async_trait;
pub use device::*;
pub use subscription::Subscription;
pub use tokio_util::sync::CancellationToken;

/// Boxed cause carried by hotplug stream errors
pub type StreamError = Box<dyn Error + Send + Sync>;

/// Receiver side of a hotplug subscription.
///
/// The transport calls these methods from its delivery loop, one at a time
/// and in delivery order. Implementations must return promptly.
pub trait HotplugObserver: Send + Sync {
    /// A device was attached or detached
    fn next(&self, event: HotplugEvent);

    /// The stream failed; no further notifications follow
    fn error(&self, error: StreamError);

    /// The stream ended on its own; no further notifications follow
    fn complete(&self);
}

/// Used to discover Ledger devices and follow them being plugged in and out
#[async_trait]
pub trait HotplugTransport: Send + Sync {
    /// Error defined by Transport used
    type Error: Error + Send + Sync + 'static;

    /// Whether this platform can use the transport at all
    async fn is_supported(&self) -> Result<bool, Self::Error>;

    /// Paths of the devices currently connected and unlocked
    async fn list(&self) -> Result<Vec<String>, Self::Error>;

    /// Start delivering hotplug notifications to `observer`.
    ///
    /// Delivery stops once the returned subscription is unsubscribed or dropped.
    fn listen(&self, observer: Arc<dyn HotplugObserver>) -> Result<Subscription, Self::Error>;
}

#[async_trait]
impl<T> HotplugTransport for Arc<T>
where
    T: HotplugTransport + ?Sized,
{
    type Error = T::Error;

    async fn is_supported(&self) -> Result<bool, Self::Error> {
        (**self).is_supported().await
    }

    async fn list(&self) -> Result<Vec<String>, Self::Error> {
        (**self).list().await
    }

    fn listen(&self, observer: Arc<dyn HotplugObserver>) -> Result<Subscription, Self::Error> {
        (**self).listen(observer)
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Hotplug event listener
//!
//! Bridges a transport's hotplug stream to the manager: every `add`/`remove`
//! notification becomes exactly one `update_devices` call, in delivery order,
//! and the end of the stream is reported once as a [`LedgerError`].

use std::sync::{Arc, Mutex, PoisonError, Weak};

use ledger_transport::{
    Device, DeviceAction, HotplugEvent, HotplugObserver, HotplugTransport, StreamError,
    Subscription,
};
use log::{debug, info, warn};
use serde::Serialize;

use crate::errors::{LedgerError, LedgerErrorCode, StreamCompleted};

/// Receives what the listener extracts from the hotplug stream.
///
/// `source` identifies the delivering listener. The listener checks its own
/// state before forwarding, but an event can still be in flight when its owner
/// stops it, so handlers decide whether `source` is still the live one.
pub trait DeviceUpdateHandler: Send + Sync {
    /// Apply one add/remove event. Must not block.
    fn update_devices(&self, source: &HotplugListener, device: Device, action: DeviceAction);

    /// The stream failed or completed while listening
    fn stream_ended(&self, source: &HotplugListener, error: LedgerError);
}

/// Per-subscription state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    /// The only state in which events are forwarded
    Listening,
    Error,
    Completed,
    /// Stopped by its owner
    Closed,
}

pub struct HotplugListener {
    handler: Weak<dyn DeviceUpdateHandler>,
    state: Mutex<ListenerState>,
}

impl HotplugListener {
    /// The listener only holds a weak reference so that a forgotten
    /// subscription cannot keep its owner alive.
    pub fn new(handler: Weak<dyn DeviceUpdateHandler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            state: Mutex::new(ListenerState::Idle),
        })
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to `transport`'s hotplug stream.
    ///
    /// Moves to `Listening` before subscribing, since a transport may deliver
    /// its first events from inside `listen`.
    pub fn start<T>(self: &Arc<Self>, transport: &T) -> Result<Subscription, T::Error>
    where
        T: HotplugTransport + ?Sized,
    {
        self.transition(ListenerState::Idle, ListenerState::Listening);

        let observer: Arc<dyn HotplugObserver> = self.clone();
        match transport.listen(observer) {
            Ok(subscription) => {
                debug!("[hotplug-listener]:start subscribed");
                Ok(subscription)
            }
            Err(e) => {
                self.transition(ListenerState::Listening, ListenerState::Error);
                Err(e)
            }
        }
    }

    /// Stop forwarding. Notifications arriving afterwards are dropped.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, ListenerState::Idle | ListenerState::Listening) {
            *state = ListenerState::Closed;
        }
    }

    fn transition(&self, from: ListenerState, to: ListenerState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn finish(&self, to: ListenerState, error: LedgerError) {
        if !self.transition(ListenerState::Listening, to) {
            debug!("[hotplug-listener]:{:?} ignored, no longer listening", to);
            return;
        }
        if let Some(handler) = self.handler.upgrade() {
            handler.stream_ended(self, error);
        }
    }
}

impl HotplugObserver for HotplugListener {
    fn next(&self, event: HotplugEvent) {
        info!(
            "[hotplug-listener]:next type={} path={} model={:?}",
            event.action,
            event.device.path,
            event.device_model.as_ref().map(|m| m.id.as_str())
        );

        if self.state() != ListenerState::Listening {
            debug!("[hotplug-listener]:next dropped, state={:?}", self.state());
            return;
        }

        let HotplugEvent { action, device, .. } = event;
        match self.handler.upgrade() {
            Some(handler) => handler.update_devices(self, device, action),
            None => debug!("[hotplug-listener]:next dropped, owner gone"),
        }
    }

    fn error(&self, error: StreamError) {
        warn!("[hotplug-listener]:error {}", error);
        self.finish(
            ListenerState::Error,
            LedgerError::from_boxed(LedgerErrorCode::ListenerFailed, error),
        );
    }

    fn complete(&self) {
        info!("[hotplug-listener]:complete");
        self.finish(
            ListenerState::Completed,
            LedgerError::new(LedgerErrorCode::ListenerCompleted, StreamCompleted),
        );
    }
}

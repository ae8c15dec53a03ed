// SPDX-License-Identifier: Apache-2.0

use tokio_util::sync::CancellationToken;

/// Handle to a live hotplug subscription.
///
/// Unsubscribing, explicitly or by dropping the handle, cancels the token
/// the transport's delivery loop watches.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop delivery. Calling it more than once is harmless.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token the delivery loop should watch for cancellation
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

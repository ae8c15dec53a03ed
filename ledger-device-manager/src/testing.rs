// SPDX-License-Identifier: Apache-2.0

//! Scripted transport for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledger_transport::{
    async_trait, CancellationToken, Device, HotplugEvent, HotplugObserver, HotplugTransport,
    Subscription,
};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MockError(pub String);

pub fn device(path: &str, product: &str) -> Device {
    let mut device = Device::with_path(path);
    device.vendor_id = ledger_transport::LEDGER_VENDOR_ID;
    device.product_id = 0x1011;
    device.manufacturer = Some("Ledger".to_string());
    device.product = Some(product.to_string());
    device
}

/// Transport whose probe answers are fixed up front.
///
/// `listen` records the observer; tests then push notifications through
/// [`emit`](Self::emit), [`fail_stream`](Self::fail_stream) and
/// [`complete_stream`](Self::complete_stream).
pub struct MockTransport {
    supported: Result<bool, MockError>,
    paths: Result<Vec<String>, MockError>,
    listen_error: Option<MockError>,
    probe_delay: Option<Duration>,
    observers: Mutex<Vec<Arc<dyn HotplugObserver>>>,
    tokens: Mutex<Vec<CancellationToken>>,
    support_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MockTransport {
    fn with(supported: Result<bool, MockError>, paths: Result<Vec<String>, MockError>) -> Self {
        Self {
            supported,
            paths,
            listen_error: None,
            probe_delay: None,
            observers: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            support_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn ready(paths: Vec<&str>) -> Self {
        Self::with(Ok(true), Ok(paths.into_iter().map(String::from).collect()))
    }

    pub fn unsupported() -> Self {
        Self::with(Ok(false), Ok(Vec::new()))
    }

    pub fn support_failing(message: &str) -> Self {
        Self::with(Err(MockError(message.to_string())), Ok(Vec::new()))
    }

    pub fn list_failing(message: &str) -> Self {
        Self::with(Ok(true), Err(MockError(message.to_string())))
    }

    pub fn with_listen_error(mut self, message: &str) -> Self {
        self.listen_error = Some(MockError(message.to_string()));
        self
    }

    /// Make both probes take this long before answering
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    fn latest(&self) -> Option<Arc<dyn HotplugObserver>> {
        self.observers.lock().unwrap().last().cloned()
    }

    pub fn emit(&self, event: HotplugEvent) {
        if let Some(observer) = self.latest() {
            observer.next(event);
        }
    }

    pub fn fail_stream(&self, message: &str) {
        if let Some(observer) = self.latest() {
            observer.error(Box::new(MockError(message.to_string())));
        }
    }

    pub fn complete_stream(&self) {
        if let Some(observer) = self.latest() {
            observer.complete();
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|token| !token.is_cancelled())
            .count()
    }

    pub fn support_calls(&self) -> usize {
        self.support_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HotplugTransport for MockTransport {
    type Error = MockError;

    async fn is_supported(&self) -> Result<bool, Self::Error> {
        self.support_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.supported.clone()
    }

    async fn list(&self) -> Result<Vec<String>, Self::Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.paths.clone()
    }

    fn listen(&self, observer: Arc<dyn HotplugObserver>) -> Result<Subscription, Self::Error> {
        if let Some(e) = &self.listen_error {
            return Err(e.clone());
        }
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().push(token.clone());
        self.observers.lock().unwrap().push(observer);
        Ok(Subscription::new(token))
    }
}

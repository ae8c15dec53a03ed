use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerHIDError {
    /// HID error
    #[error("Ledger device: HID error `{0}`")]
    Hid(#[from] hidapi::HidError),
    /// Blocking HID call was cancelled or panicked
    #[error("Ledger device: HID worker failed")]
    Join(#[from] tokio::task::JoinError),
    /// Hotplug monitor could not be started
    #[error("Ledger device: monitor error `{0}`")]
    Monitor(#[from] std::io::Error),
}

// SPDX-License-Identifier: Apache-2.0

//! Watch Ledger devices being plugged in and out
//!
//! This example shows how to:
//! 1. Load manager and HID settings from a JSON file (optional)
//! 2. Initialize the device manager over the HID transport
//! 3. Follow readiness and the connected devices until Ctrl-C
//!
//! Set `LEDGER_MANAGER_CONFIG=/path/to/config.json` to override defaults, e.g.
//! `{"manager": {"probe_timeout_ms": 5000}, "hid": {"poll_interval_ms": 250}}`.
//! Set `RUST_LOG=info` to see the state transitions as they are logged.

use std::error::Error;
use std::time::Duration;

use ledger_device_manager::{CancellationToken, DeviceManager, ManagerConfig};
use ledger_transport_hid::{HidConfig, TransportHid};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    manager: ManagerConfig,
    hid: HidConfig,
}

fn load_settings() -> Result<Settings, Box<dyn Error>> {
    match std::env::var("LEDGER_MANAGER_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        Err(_) => Ok(Settings::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init();

    let settings = load_settings()?;
    log::debug!("settings: {:?}", settings);

    let transport = TransportHid::with_config(settings.hid);
    let manager = DeviceManager::with_config(transport, settings.manager);

    // Ctrl-C during the probes abandons initialization
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    println!("🔌 Probing HID transport...");
    manager.initialize_with_cancel(&cancel).await;

    if let Some(error) = manager.error() {
        if error.is_probe_error() {
            eprintln!("❌ HID transport unusable: {}", error);
        } else {
            eprintln!("❌ Not ready: {}", error);
        }
        return Ok(());
    }
    if manager.is_ready() != Some(true) {
        eprintln!("❌ HID transport not supported on this platform");
        return Ok(());
    }

    println!("✅ Ready, {} device path(s) at startup", manager.device_paths().len());
    println!("Plug or unplug a Ledger; Ctrl-C to quit.");

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut last_seen: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if manager.is_ready() != Some(true) {
                    match manager.error() {
                        Some(error) if error.is_listener_error() => {
                            eprintln!("❌ Hotplug stream ended: {}", error);
                        }
                        Some(error) => eprintln!("❌ Lost readiness: {}", error),
                        None => eprintln!("❌ Lost readiness"),
                    }
                    break;
                }

                let devices = manager.devices();
                let paths: Vec<String> = devices.iter().map(|d| d.path.clone()).collect();
                if paths != last_seen {
                    println!("📋 {} device(s) connected", devices.len());
                    for device in devices.iter() {
                        let model = device
                            .model()
                            .map(|m| m.product_name)
                            .or_else(|| device.product.clone())
                            .unwrap_or_else(|| "unknown".to_string());
                        println!("   - {} ({})", model, device.path);
                    }
                    last_seen = paths;
                }
            }
        }
    }

    manager.shutdown();
    println!("👋 Stopped");

    Ok(())
}

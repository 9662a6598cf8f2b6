//! Stream heart rate and pulse intervals from a real sensor
//!
//! Scans for the first heart-rate sensor, connects, streams for a minute and
//! saves the recorded intervals to the current directory.
//!
//! Run with: cargo run --example stream_heart_rate [DEVICE_ID]

use hrv_sensor_bridge::{
    AdapterState, BridgeEvent, DeviceBridge, FileDeviceStore, GattProvider, Result,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hrv_sensor_bridge=debug".parse().unwrap()),
        )
        .init();

    let provider = GattProvider::new().await?;
    let bridge = DeviceBridge::builder(provider)
        .store(Arc::new(FileDeviceStore::new(".hrv_last_device")))
        .build();

    if bridge.check_bluetooth().await? == AdapterState::PoweredOff {
        println!("Bluetooth is off, please switch it on.");
        return Ok(());
    }

    let mut events = bridge.subscribe();
    bridge.initialize().await?;

    match std::env::args().nth(1) {
        Some(device_id) => bridge.connect(&device_id).await?,
        None => {
            println!("Scanning for a heart rate sensor...");
            bridge.scan().await?;
        }
    }

    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => {
                let Ok(event) = event else { break };
                match &event {
                    BridgeEvent::DeviceFound { device_id } => {
                        println!("Found {}, connecting", device_id);
                        bridge.connect(device_id).await?;
                    }
                    BridgeEvent::DeviceConnected { device_id } => {
                        println!("Connected to {}", device_id);
                        bridge.start_hr_streaming().await?;
                    }
                    BridgeEvent::HrData { hr, rr } => match rr {
                        Some(rr) => println!("HR {:>3} bpm  RR {} ms", hr, rr),
                        None => println!("HR {:>3} bpm", hr),
                    },
                    BridgeEvent::PpiData { ppi } => {
                        for sample in ppi {
                            println!("  PPI {} ms at {}", sample.ppi, sample.timestamp);
                        }
                    }
                    other => println!("{}", other.to_json()?),
                }
            }
        }
    }

    bridge.stop_hr_streaming();
    if let Some(path) = bridge.save_recording(std::path::Path::new("."))? {
        println!("Saved recording to {}", path.display());
    }
    bridge.teardown().await;

    Ok(())
}

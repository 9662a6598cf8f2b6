//! Drive the bridge with the simulated SDK
//!
//! Shows the full event flow without any Bluetooth hardware.
//!
//! Run with: cargo run --example simulated_session

use hrv_sensor_bridge::{
    DeviceBridge, DeviceInfo, HrBatch, HrSample, PpiBatch, Result, SimulatedProvider,
};
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

    let (provider, controller) = SimulatedProvider::new();
    controller.set_auto_connect(true);

    let bridge = DeviceBridge::new(provider);

    // Print every event as JSON
    let _handle = bridge.on_event(|event| {
        if let Ok(json) = event.to_json() {
            println!("{}", json);
        }
    });

    bridge.initialize().await?;
    bridge.scan().await?;
    controller.discover(DeviceInfo::new("B5A3F21C").with_name("Polar H10 B5A3F21C"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    bridge.connect("B5A3F21C").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    bridge.start_hr_streaming().await?;

    for (hr, rr) in [(72u16, 833u16), (75, 800), (74, 811)] {
        controller.push_hr(HrBatch {
            samples: vec![HrSample::with_rr(hr, vec![rr])],
        });
        controller.push_ppi(PpiBatch::from_intervals(&[rr]));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let recording = bridge.recording();
    println!(
        "Recorded {} intervals, mean {:.1} ms",
        recording.len(),
        recording.mean_interval_ms().unwrap_or_default()
    );

    bridge.teardown().await;
    Ok(())
}

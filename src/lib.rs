// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # hrv-sensor-bridge
//!
//! An event bridge between a Bluetooth LE heart-rate sensor SDK and a host
//! application, built for heart-rate-variability tracking with Polar-style
//! chest straps.
//!
//! The bridge issues commands to the sensor SDK (initialize, scan, connect,
//! stream) and republishes everything the SDK reports as named
//! [`BridgeEvent`]s with JSON payloads.
//!
//! ## Features
//!
//! - **Discovery**: Scan and report the first matching device
//! - **Lifecycle events**: Bluetooth power, connect, disconnect, feature ready
//! - **Heart rate**: One event per sample, with the first RR interval
//! - **Pulse intervals**: Started automatically once streaming is ready,
//!   delivered as time-stamped batches
//! - **Recording**: Every interval kept for JSON export after a session
//! - **Pluggable SDK**: btleplug GATT backend, or a simulated SDK for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hrv_sensor_bridge::{BridgeEvent, DeviceBridge, GattProvider, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = DeviceBridge::new(GattProvider::new().await?);
//!     let mut events = bridge.subscribe();
//!
//!     bridge.initialize().await?;
//!     bridge.scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match &event {
//!             BridgeEvent::DeviceFound { device_id } => bridge.connect(device_id).await?,
//!             BridgeEvent::DeviceConnected { .. } => bridge.start_hr_streaming().await?,
//!             BridgeEvent::HrData { hr, .. } => println!("{} bpm", hr),
//!             _ => {}
//!         }
//!     }
//!
//!     bridge.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! The GATT backend inherits btleplug's requirements: Bluetooth permission
//! on macOS, BlueZ on Linux, and Windows 10 or later.

// Public modules
pub mod bridge;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod sdk;
pub mod subscription;
pub mod utils;

// Re-exports for convenience
pub use bridge::{DeviceBridge, DeviceBridgeBuilder};
pub use config::{BridgeConfig, DEFAULT_EVENT_CAPACITY};
pub use error::{Error, Result};
pub use events::{BridgeEvent, StampedInterval};
pub use subscription::{CallbackHandle, StreamKind};
pub use utils::{
    format_clock_time, normalize_device_id, Clock, FixedClock, SystemClock,
};

// Re-export commonly used types from submodules
pub use data::{DeviceStore, FileDeviceStore, IntervalRecording, MemoryDeviceStore};
pub use sdk::{
    AdapterState, DeviceInfo, GattProvider, HrBatch, HrSample, PpiBatch, PpiSample, SdkError,
    SdkEvent, SdkFeature, SdkProvider, SensorSdk, SimulatedController, SimulatedProvider,
    StreamError,
};

//! Session data kept by the bridge.
//!
//! Interval recordings for export and the persisted id of the last
//! connected device.

pub mod device_store;
pub mod recording;

pub use device_store::{DeviceStore, FileDeviceStore, MemoryDeviceStore};
pub use recording::{IntervalRecording, RecordedInterval, RECORDING_FILE_PREFIX};

//! BLE Service and Characteristic UUIDs.
//!
//! Standard SIG UUIDs used by heart-rate sensors, plus the Polar
//! measurement data service used to recognise Polar devices.

use uuid::Uuid;

// Heart Rate Service (Standard BLE)
/// Standard BLE Heart Rate Service UUID.
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);
/// Heart Rate Measurement characteristic UUID (Notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_00805f9b34fb);

// Battery Service (Standard BLE)
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

// Device Information Service (Standard BLE)
/// Standard BLE Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);

// Polar Measurement Data service
/// Polar PMD Service UUID, advertised by Polar sensors.
pub const POLAR_PMD_SERVICE_UUID: Uuid = Uuid::from_u128(0xfb00_5c80_02e7_f387_1cad_8acd2d8df0c8);

/// Advertised name prefix of Polar sensors.
pub const POLAR_NAME_PREFIX: &str = "Polar";

/// Check if a set of advertised services and name identifies a heart-rate sensor.
pub fn is_heart_rate_device(services: &[Uuid], local_name: Option<&str>) -> bool {
    services
        .iter()
        .any(|s| *s == HEART_RATE_SERVICE_UUID || *s == POLAR_PMD_SERVICE_UUID)
        || local_name
            .map(|n| n.starts_with(POLAR_NAME_PREFIX))
            .unwrap_or(false)
}

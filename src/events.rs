//! Events published to the host application.

use serde::Serialize;
use serde_json::Value;

use crate::sdk::SdkFeature;

/// A pulse interval stamped with the wall-clock time of its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StampedInterval {
    /// Interval in milliseconds.
    pub ppi: u16,
    /// Time the batch was received, `HH:mm:ss`.
    pub timestamp: String,
}

/// An event emitted by the bridge.
///
/// Serializes as `{"name": <wire name>, "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name", content = "payload")]
pub enum BridgeEvent {
    /// The Bluetooth adapter was powered on or off.
    #[serde(rename = "onBlePowerChanged")]
    BlePowerChanged { powered: bool },

    /// A device finished connecting.
    #[serde(rename = "onDeviceConnected")]
    DeviceConnected {
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// A device disconnected.
    #[serde(rename = "onDeviceDisconnected")]
    DeviceDisconnected {
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// Discovery found a device.
    #[serde(rename = "onDeviceFound")]
    DeviceFound {
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// A device feature became ready.
    #[serde(rename = "onFeatureReady")]
    FeatureReady {
        #[serde(rename = "deviceId")]
        device_id: String,
        feature: SdkFeature,
    },

    /// Discovery failed.
    #[serde(rename = "onScanError")]
    ScanError { message: String },

    /// One heart-rate sample.
    #[serde(rename = "onHrData")]
    HrData {
        hr: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        rr: Option<u16>,
    },

    /// The heart-rate stream failed.
    #[serde(rename = "onHrError")]
    HrError { message: String },

    /// One batch of pulse intervals.
    #[serde(rename = "onPpiData")]
    PpiData { ppi: Vec<StampedInterval> },

    /// The pulse-interval stream failed.
    #[serde(rename = "onPPiError")]
    PpiError { message: String },
}

impl BridgeEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::BlePowerChanged { .. } => "onBlePowerChanged",
            BridgeEvent::DeviceConnected { .. } => "onDeviceConnected",
            BridgeEvent::DeviceDisconnected { .. } => "onDeviceDisconnected",
            BridgeEvent::DeviceFound { .. } => "onDeviceFound",
            BridgeEvent::FeatureReady { .. } => "onFeatureReady",
            BridgeEvent::ScanError { .. } => "onScanError",
            BridgeEvent::HrData { .. } => "onHrData",
            BridgeEvent::HrError { .. } => "onHrError",
            BridgeEvent::PpiData { .. } => "onPpiData",
            BridgeEvent::PpiError { .. } => "onPPiError",
        }
    }

    /// The event payload as a JSON object.
    pub fn payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Render `{"name": ..., "payload": ...}` as a string.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether this event reports a stream or discovery failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            BridgeEvent::ScanError { .. } | BridgeEvent::HrError { .. } | BridgeEvent::PpiError { .. }
        )
    }
}

//! Sensor SDK capability interface.
//!
//! The bridge never talks to Bluetooth directly. Everything it needs from a
//! sensor SDK is expressed by [`SensorSdk`] (one constructed client) and
//! [`SdkProvider`] (construction plus adapter-level queries). Two backends
//! ship with the crate:
//!
//! - [`gatt`]: btleplug over the standard Heart Rate GATT service.
//! - [`simulated`]: scriptable in-process SDK for tests and demos.

pub mod gatt;
pub mod measurement;
pub mod simulated;
pub mod uuids;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::broadcast;

pub use gatt::{GattProvider, GattSdk};
pub use measurement::HeartRateMeasurement;
pub use simulated::{SdkCall, SimulatedController, SimulatedProvider};

/// Errors reported by an SDK backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable")]
    Unavailable,

    /// An argument was rejected, usually an unknown device id.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The SDK refused or failed the requested operation.
    #[error("{message}")]
    Operation {
        /// Human-readable description.
        message: String,
    },

    /// Error from the Bluetooth stack.
    #[error("Bluetooth: {0}")]
    Bluetooth(String),
}

impl From<btleplug::Error> for SdkError {
    fn from(e: btleplug::Error) -> Self {
        Self::Bluetooth(e.to_string())
    }
}

/// Result type used by SDK backends.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Terminal error delivered inside a stream.
///
/// The vendor does not always attach a message, so it is optional and the
/// bridge substitutes a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamError {
    /// Message attached by the SDK, if any.
    pub message: Option<String>,
}

impl StreamError {
    /// Create an error carrying a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// Create an error without a message.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// The message, or `fallback` when the SDK supplied none (or an empty one).
    pub fn message_or(&self, fallback: &str) -> String {
        match self.message.as_deref() {
            Some(m) if !m.trim().is_empty() => m.to_string(),
            _ => fallback.to_string(),
        }
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message_or("stream error"))
    }
}

/// A stream of items from the SDK. The first `Err` is terminal.
pub type SdkStream<T> = BoxStream<'static, std::result::Result<T, StreamError>>;

/// Optional SDK capabilities requested at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkFeature {
    /// Live heart-rate and pulse-interval streaming.
    OnlineStreaming,
    /// Device information service.
    DeviceInfo,
    /// Battery level.
    BatteryInfo,
}

impl SdkFeature {
    /// All features, in the order they are requested by default.
    pub const ALL: [SdkFeature; 3] = [
        SdkFeature::OnlineStreaming,
        SdkFeature::DeviceInfo,
        SdkFeature::BatteryInfo,
    ];

    /// Stable name used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlineStreaming => "online_streaming",
            Self::DeviceInfo => "device_info",
            Self::BatteryInfo => "battery_info",
        }
    }
}

impl std::fmt::Display for SdkFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the host's Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterState {
    /// No adapter present.
    Unavailable,
    /// Adapter present but switched off.
    PoweredOff,
    /// Adapter ready.
    #[default]
    PoweredOn,
}

impl AdapterState {
    /// Check if the adapter can be used.
    pub fn is_powered(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

/// A discovered or connected sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// SDK identifier of the device.
    pub device_id: String,
    /// Advertised name, if known.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DeviceInfo {
    /// Create a device description with just an id.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            rssi: None,
        }
    }

    /// Attach an advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One heart-rate reading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HrSample {
    /// Beats per minute.
    pub hr: u16,
    /// RR intervals reported with this reading, in milliseconds.
    pub rr_ms: Vec<u16>,
}

impl HrSample {
    /// A reading without RR intervals.
    pub fn new(hr: u16) -> Self {
        Self {
            hr,
            rr_ms: Vec::new(),
        }
    }

    /// A reading with RR intervals.
    pub fn with_rr(hr: u16, rr_ms: Vec<u16>) -> Self {
        Self { hr, rr_ms }
    }
}

/// A batch of heart-rate readings delivered by one SDK callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HrBatch {
    /// Samples in delivery order.
    pub samples: Vec<HrSample>,
}

impl HrBatch {
    /// Build a batch from plain BPM values.
    pub fn from_bpm(values: &[u16]) -> Self {
        Self {
            samples: values.iter().copied().map(HrSample::new).collect(),
        }
    }
}

/// One pulse-to-pulse interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PpiSample {
    /// Interval in milliseconds.
    pub ppi_ms: u16,
}

/// A batch of pulse intervals delivered by one SDK callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PpiBatch {
    /// Samples in delivery order.
    pub samples: Vec<PpiSample>,
}

impl PpiBatch {
    /// Build a batch from interval values in milliseconds.
    pub fn from_intervals(values: &[u16]) -> Self {
        Self {
            samples: values.iter().map(|&ppi_ms| PpiSample { ppi_ms }).collect(),
        }
    }
}

/// Lifecycle callbacks from the SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    /// Bluetooth power state changed.
    PowerStateChanged {
        /// Whether the adapter is powered.
        powered: bool,
    },
    /// A device finished connecting.
    DeviceConnected(DeviceInfo),
    /// A device disconnected.
    DeviceDisconnected(DeviceInfo),
    /// A requested feature became usable on a device.
    FeatureReady {
        /// Device the feature belongs to.
        device_id: String,
        /// The feature.
        feature: SdkFeature,
    },
}

/// One constructed sensor SDK client.
///
/// Calls return once the request is registered; results arrive through the
/// returned streams or through [`SensorSdk::subscribe_lifecycle`].
#[async_trait]
pub trait SensorSdk: Send + Sync {
    /// Subscribe to lifecycle callbacks.
    fn subscribe_lifecycle(&self) -> broadcast::Receiver<SdkEvent>;

    /// Start discovering devices.
    async fn search_for_device(&self) -> SdkResult<SdkStream<DeviceInfo>>;

    /// Request a connection. Completion is reported as [`SdkEvent::DeviceConnected`].
    async fn connect_to_device(&self, device_id: &str) -> SdkResult<()>;

    /// Request a disconnect.
    async fn disconnect_from_device(&self, device_id: &str) -> SdkResult<()>;

    /// Open the heart-rate stream of a connected device.
    async fn start_hr_streaming(&self, device_id: &str) -> SdkResult<SdkStream<HrBatch>>;

    /// Open the pulse-interval stream of a connected device.
    async fn start_ppi_streaming(&self, device_id: &str) -> SdkResult<SdkStream<PpiBatch>>;

    /// Release all SDK resources. Must tolerate repeated calls.
    async fn shut_down(&self);
}

/// Constructs SDK clients and answers adapter questions.
#[async_trait]
pub trait SdkProvider: Send + Sync {
    /// Construct a client with the requested features.
    async fn create(&self, features: &[SdkFeature]) -> SdkResult<Arc<dyn SensorSdk>>;

    /// Current adapter state.
    async fn adapter_state(&self) -> SdkResult<AdapterState>;

    /// Ask the platform to switch Bluetooth on.
    async fn request_enable(&self) -> SdkResult<()> {
        Ok(())
    }
}

//! Bridge configuration.

use serde::Deserialize;

use crate::sdk::SdkFeature;

/// Default capacity of the host event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Message used when a heart-rate stream fails without one.
pub const DEFAULT_HR_ERROR_MESSAGE: &str = "Unknown HR error";

/// Message used when a pulse-interval stream fails without one.
pub const DEFAULT_PPI_ERROR_MESSAGE: &str = "Unknown PPI error";

/// Message used when discovery fails without one.
pub const DEFAULT_SCAN_ERROR_MESSAGE: &str = "Unknown scan error";

/// Configuration for a [`DeviceBridge`](crate::DeviceBridge).
///
/// Missing fields take their defaults, so hosts can deserialize a partial
/// JSON or TOML document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Features requested when the SDK client is constructed.
    pub features: Vec<SdkFeature>,
    /// Capacity of the broadcast channel carrying events to the host.
    pub event_capacity: usize,
    /// Record every pulse and RR interval for later export.
    pub record_intervals: bool,
    /// Fallback message for heart-rate stream errors.
    pub hr_error_fallback: String,
    /// Fallback message for pulse-interval stream errors.
    pub ppi_error_fallback: String,
    /// Fallback message for discovery errors.
    pub scan_error_fallback: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            features: SdkFeature::ALL.to_vec(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            record_intervals: true,
            hr_error_fallback: DEFAULT_HR_ERROR_MESSAGE.to_string(),
            ppi_error_fallback: DEFAULT_PPI_ERROR_MESSAGE.to_string(),
            scan_error_fallback: DEFAULT_SCAN_ERROR_MESSAGE.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether pulse-interval streaming can ever start.
    pub fn streams_online(&self) -> bool {
        self.features.contains(&SdkFeature::OnlineStreaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.features, SdkFeature::ALL.to_vec());
        assert_eq!(config.event_capacity, 256);
        assert!(config.record_intervals);
        assert!(config.streams_online());
        assert_eq!(config.hr_error_fallback, "Unknown HR error");
    }

    #[test]
    fn test_partial_json() {
        let config =
            BridgeConfig::from_json(r#"{"features": ["battery_info"], "record_intervals": false}"#)
                .unwrap();
        assert_eq!(config.features, vec![SdkFeature::BatteryInfo]);
        assert!(!config.record_intervals);
        assert!(!config.streams_online());
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_bad_json() {
        assert!(BridgeConfig::from_json(r#"{"features": ["warp_drive"]}"#).is_err());
    }
}

//! Error types for the hrv-sensor-bridge crate.

use thiserror::Error;

use crate::sdk::SdkError;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation was invoked before `initialize()` completed.
    #[error("SDK not initialized, call initialize first")]
    NotInitialized,

    /// Streaming or disconnect was requested without a connected device.
    #[error("No device connected")]
    NoDevice,

    /// The sensor SDK client could not be constructed.
    #[error("SDK initialization failed: {reason}")]
    Init {
        /// Description of why construction failed.
        reason: String,
    },

    /// Device discovery could not be started.
    #[error("Scan failed: {reason}")]
    Scan {
        /// Description of why the scan request was rejected.
        reason: String,
    },

    /// The connection request was rejected by the SDK.
    #[error("Connect request failed: {reason}")]
    Connect {
        /// Description of why the request was rejected.
        reason: String,
    },

    /// Bluetooth is not available on this system.
    #[error("Bluetooth not available")]
    BluetoothUnavailable,

    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Error reported by the sensor SDK outside a specific command.
    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),

    /// Filesystem error while persisting recordings or device ids.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data was received from the sensor.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code, matching the codes host applications
    /// already switch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::NoDevice => "NO_DEVICE",
            Self::Init { .. } => "INIT_ERROR",
            Self::Scan { .. } => "SCAN_ERROR",
            Self::Connect { .. } => "CONNECT_ERROR",
            Self::BluetoothUnavailable => "NO_BT",
            Self::Bluetooth(_) | Self::Sdk(_) => "SDK_ERROR",
            Self::Io(_) | Self::Serialization(_) => "STORAGE_ERROR",
            Self::InvalidData { .. } => "INVALID_DATA",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotInitialized.code(), "NOT_INITIALIZED");
        assert_eq!(Error::NoDevice.code(), "NO_DEVICE");
        assert_eq!(
            Error::Connect {
                reason: "busy".to_string()
            }
            .code(),
            "CONNECT_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::Init {
            reason: "no adapter".to_string(),
        };
        assert_eq!(err.to_string(), "SDK initialization failed: no adapter");
    }
}

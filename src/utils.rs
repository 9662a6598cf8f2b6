//! Utility functions for the hrv-sensor-bridge crate.

use chrono::{Local, NaiveDateTime};

/// Source of wall-clock time for sample stamping.
pub trait Clock: Send + Sync {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Format a time as `HH:mm:ss`, the resolution of pulse-interval timestamps.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use hrv_sensor_bridge::format_clock_time;
///
/// let t = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_milli_opt(9, 5, 7, 250).unwrap();
/// assert_eq!(format_clock_time(&t), "09:05:07");
/// ```
#[inline]
pub fn format_clock_time(time: &NaiveDateTime) -> String {
    time.format("%H:%M:%S").to_string()
}

/// Format a time as `HH:mm:ss.SSS`, used by interval recordings.
#[inline]
pub fn format_precise_time(time: &NaiveDateTime) -> String {
    time.format("%H:%M:%S%.3f").to_string()
}

/// Format a date and time as `yyyy-MM-dd HH:mm:ss`.
#[inline]
pub fn format_session_start(time: &NaiveDateTime) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Normalize a user-supplied device id: trimmed and upper-cased.
///
/// Returns `None` for blank input.
///
/// # Example
///
/// ```
/// use hrv_sensor_bridge::normalize_device_id;
///
/// assert_eq!(normalize_device_id(" a1b2c3d4 ").as_deref(), Some("A1B2C3D4"));
/// assert_eq!(normalize_device_id("   "), None);
/// ```
pub fn normalize_device_id(id: &str) -> Option<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// Instantaneous heart rate implied by an interval in milliseconds.
///
/// Returns `None` for a zero interval.
#[inline]
pub fn interval_to_bpm(interval_ms: u16) -> Option<f64> {
    if interval_ms == 0 {
        None
    } else {
        Some(60_000.0 / f64::from(interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_milli_opt(12, 0, 0, 42)
            .unwrap()
    }

    #[test]
    fn test_time_formats() {
        assert_eq!(format_clock_time(&noon()), "12:00:00");
        assert_eq!(format_precise_time(&noon()), "12:00:00.042");
        assert_eq!(format_session_start(&noon()), "2024-05-17 12:00:00");
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock(noon());
        assert_eq!(clock.now(), noon());
    }

    #[test]
    fn test_normalize_device_id() {
        assert_eq!(normalize_device_id("b5a3f21c").as_deref(), Some("B5A3F21C"));
        assert_eq!(normalize_device_id("\tB5A3F21C\n").as_deref(), Some("B5A3F21C"));
        assert_eq!(normalize_device_id(""), None);
    }

    #[test]
    fn test_interval_to_bpm() {
        assert!((interval_to_bpm(1000).unwrap() - 60.0).abs() < 0.001);
        assert!((interval_to_bpm(800).unwrap() - 75.0).abs() < 0.001);
        assert_eq!(interval_to_bpm(0), None);
    }
}

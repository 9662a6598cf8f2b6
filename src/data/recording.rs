//! Interval recording.
//!
//! Keeps every pulse and RR interval seen during a session so it can be
//! exported as a JSON document after the measurement.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::utils::{format_precise_time, format_session_start};

/// Prefix of exported recording files.
pub const RECORDING_FILE_PREFIX: &str = "Polar_Data_";

/// A single recorded interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedInterval {
    /// Wall-clock time the interval was received, `HH:mm:ss.SSS`.
    pub time: String,
    /// Interval length in milliseconds.
    pub interval_ms: u16,
}

#[derive(Serialize)]
struct RecordingDocument<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    session_start: String,
    data: &'a [RecordedInterval],
}

/// Intervals recorded during one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalRecording {
    entries: Vec<RecordedInterval>,
}

impl IntervalRecording {
    /// Create an empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interval received at `at`.
    pub fn record(&mut self, at: NaiveDateTime, interval_ms: u16) {
        self.entries.push(RecordedInterval {
            time: format_precise_time(&at),
            interval_ms,
        });
    }

    /// Record several intervals received together.
    pub fn extend(&mut self, at: NaiveDateTime, intervals: impl IntoIterator<Item = u16>) {
        for interval in intervals {
            self.record(at, interval);
        }
    }

    /// Number of recorded intervals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded intervals, oldest first.
    pub fn entries(&self) -> &[RecordedInterval] {
        &self.entries
    }

    /// Mean interval in milliseconds.
    pub fn mean_interval_ms(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let total: u64 = self.entries.iter().map(|e| u64::from(e.interval_ms)).sum();
        Some(total as f64 / self.entries.len() as f64)
    }

    /// Discard all recorded intervals.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the recording as a JSON document.
    ///
    /// `session_start` is the time the document is produced, not the time of
    /// the first interval.
    pub fn to_json(&self, device_id: &str, session_start: &NaiveDateTime) -> Result<String> {
        let document = RecordingDocument {
            device_id,
            session_start: format_session_start(session_start),
            data: &self.entries,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write the recording into `dir` as `Polar_Data_<epoch millis>.json`,
    /// stamped with `saved_at` as its session start.
    ///
    /// Returns `Ok(None)` without touching the filesystem when nothing has
    /// been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_json(
        &self,
        dir: &Path,
        device_id: &str,
        saved_at: NaiveDateTime,
    ) -> Result<Option<PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }

        let json = self.to_json(device_id, &saved_at)?;
        let path = dir.join(format!(
            "{}{}.json",
            RECORDING_FILE_PREFIX,
            saved_at.and_utc().timestamp_millis()
        ));
        fs::write(&path, json)?;

        info!(
            "Saved {} intervals for {} to {}",
            self.len(),
            device_id,
            path.display()
        );
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_record_and_json() {
        let mut recording = IntervalRecording::new();
        recording.record(at(12, 0, 0, 5), 812);
        recording.extend(at(12, 0, 1, 10), [798, 805]);

        assert_eq!(recording.len(), 3);
        assert_eq!(recording.entries()[1].time, "12:00:01.010");

        let json = recording.to_json("B5A3F21C", &at(12, 30, 0, 0)).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed,
            json!({
                "deviceId": "B5A3F21C",
                "session_start": "2024-05-17 12:30:00",
                "data": [
                    {"time": "12:00:00.005", "interval_ms": 812},
                    {"time": "12:00:01.010", "interval_ms": 798},
                    {"time": "12:00:01.010", "interval_ms": 805},
                ]
            })
        );
    }

    #[test]
    fn test_mean_and_clear() {
        let mut recording = IntervalRecording::new();
        assert_eq!(recording.mean_interval_ms(), None);
        recording.extend(at(8, 0, 0, 0), [800, 1000]);
        assert_eq!(recording.mean_interval_ms(), Some(900.0));
        recording.clear();
        assert!(recording.is_empty());
        assert_eq!(recording.mean_interval_ms(), None);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut recording = IntervalRecording::new();
        recording.record(at(12, 0, 0, 0), 750);

        let saved_at = at(12, 5, 0, 0);
        let path = recording
            .write_json(dir.path(), "B5A3F21C", saved_at)
            .unwrap()
            .unwrap();
        let expected = format!("Polar_Data_{}.json", saved_at.and_utc().timestamp_millis());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), expected);

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["session_start"], json!("2024-05-17 12:05:00"));
        assert_eq!(parsed["data"][0]["interval_ms"], json!(750));
    }

    #[test]
    fn test_write_empty_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recording = IntervalRecording::new();
        assert_eq!(
            recording
                .write_json(dir.path(), "B5A3F21C", at(12, 0, 0, 0))
                .unwrap(),
            None
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut recording = IntervalRecording::new();
        recording.record(at(12, 0, 0, 0), 750);
        let missing = dir.path().join("nope");
        assert!(recording.write_json(&missing, "X", at(12, 0, 0, 0)).is_err());
    }
}

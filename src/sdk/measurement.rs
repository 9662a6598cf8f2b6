//! Heart Rate Measurement parsing.
//!
//! Parses notifications from the standard Heart Rate Measurement
//! characteristic (0x2A37).

use crate::error::{Error, Result};

/// Parsed Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute.
    pub bpm: u16,
    /// Sensor contact status, when the sensor supports reporting it.
    pub sensor_contact: Option<bool>,
    /// RR intervals in milliseconds, oldest first.
    pub rr_intervals_ms: Vec<u16>,
}

impl HeartRateMeasurement {
    const FLAG_VALUE_U16: u8 = 0x01;
    const FLAG_CONTACT_DETECTED: u8 = 0x02;
    const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
    const FLAG_ENERGY_EXPENDED: u8 = 0x08;
    const FLAG_RR_PRESENT: u8 = 0x10;

    /// Parse a measurement from notification data.
    ///
    /// Layout:
    /// - Byte 0: flags
    /// - Byte 1 (or bytes 1-2 when bit 0 is set): heart rate value
    /// - 2 bytes energy expended when bit 3 is set (skipped)
    /// - Remaining 2-byte pairs: RR intervals in 1/1024 s when bit 4 is set
    pub fn parse(data: &[u8]) -> Result<Self> {
        let flags = *data.first().ok_or_else(|| Error::InvalidData {
            context: "Empty heart rate measurement".to_string(),
        })?;

        let mut offset = 1;

        let bpm = if flags & Self::FLAG_VALUE_U16 != 0 {
            let value = read_u16(data, offset)?;
            offset += 2;
            value
        } else {
            let value = *data.get(offset).ok_or_else(|| Error::InvalidData {
                context: "Heart rate measurement missing value".to_string(),
            })?;
            offset += 1;
            u16::from(value)
        };

        let sensor_contact = if flags & Self::FLAG_CONTACT_SUPPORTED != 0 {
            Some(flags & Self::FLAG_CONTACT_DETECTED != 0)
        } else {
            None
        };

        if flags & Self::FLAG_ENERGY_EXPENDED != 0 {
            read_u16(data, offset)?;
            offset += 2;
        }

        let mut rr_intervals_ms = Vec::new();
        if flags & Self::FLAG_RR_PRESENT != 0 {
            // A trailing odd byte is ignored.
            for chunk in data[offset..].chunks_exact(2) {
                let raw = u16::from_le_bytes([chunk[0], chunk[1]]);
                rr_intervals_ms.push(rr_to_ms(raw));
            }
        }

        Ok(Self {
            bpm,
            sensor_contact,
            rr_intervals_ms,
        })
    }

    /// Whether the sensor reports skin contact as lost.
    pub fn contact_lost(&self) -> bool {
        self.sensor_contact == Some(false)
    }
}

/// Convert an RR interval from 1/1024 s units to milliseconds, rounded.
pub fn rr_to_ms(raw: u16) -> u16 {
    ((u32::from(raw) * 1000 + 512) / 1024) as u16
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(Error::InvalidData {
            context: format!(
                "Heart rate measurement truncated at byte {} ({} bytes)",
                offset,
                data.len()
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_u8_value() {
        let m = HeartRateMeasurement::parse(&[0x00, 72]).unwrap();
        assert_eq!(m.bpm, 72);
        assert_eq!(m.sensor_contact, None);
        assert!(m.rr_intervals_ms.is_empty());
    }

    #[test]
    fn test_parse_u16_value_with_contact() {
        let m = HeartRateMeasurement::parse(&[0x07, 0x2C, 0x01]).unwrap();
        assert_eq!(m.bpm, 300);
        assert_eq!(m.sensor_contact, Some(true));
        assert!(!m.contact_lost());
    }

    #[test]
    fn test_parse_contact_lost() {
        let m = HeartRateMeasurement::parse(&[0x04, 0]).unwrap();
        assert_eq!(m.sensor_contact, Some(false));
        assert!(m.contact_lost());
    }

    #[test]
    fn test_parse_rr_intervals() {
        // flags: RR present; bpm 75; RR 1024 (= 1000 ms) and 819 (= 800 ms)
        let data = [0x10, 75, 0x00, 0x04, 0x33, 0x03];
        let m = HeartRateMeasurement::parse(&data).unwrap();
        assert_eq!(m.bpm, 75);
        assert_eq!(m.rr_intervals_ms, vec![1000, 800]);
    }

    #[test]
    fn test_parse_energy_then_rr() {
        let data = [0x18, 60, 0x10, 0x00, 0x00, 0x04];
        let m = HeartRateMeasurement::parse(&data).unwrap();
        assert_eq!(m.bpm, 60);
        assert_eq!(m.rr_intervals_ms, vec![1000]);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(HeartRateMeasurement::parse(&[]).is_err());
        assert!(HeartRateMeasurement::parse(&[0x00]).is_err());
        assert!(HeartRateMeasurement::parse(&[0x01, 0x48]).is_err());
        assert!(HeartRateMeasurement::parse(&[0x08, 72, 0x01]).is_err());
    }

    #[test]
    fn test_rr_to_ms() {
        assert_eq!(rr_to_ms(1024), 1000);
        assert_eq!(rr_to_ms(0), 0);
        assert_eq!(rr_to_ms(512), 500);
    }

    proptest! {
        #[test]
        fn parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = HeartRateMeasurement::parse(&data);
        }

        #[test]
        fn rr_count_matches_payload(bpm in 30u8..220, rr in proptest::collection::vec(any::<u16>(), 0..8)) {
            let mut data = vec![0x10, bpm];
            for value in &rr {
                data.extend_from_slice(&value.to_le_bytes());
            }
            let m = HeartRateMeasurement::parse(&data).unwrap();
            prop_assert_eq!(m.bpm, u16::from(bpm));
            prop_assert_eq!(m.rr_intervals_ms.len(), rr.len());
        }
    }
}

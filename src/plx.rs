//! # Pulse Oximeter Service Layout
//!
//! GATT identifiers of the Pulse Oximeter Service and the 5-byte measurement
//! payload shared by its Spot-Check and Continuous characteristics:
//!
//! ```text
//! [flags: u8 = 0][SpO2 x 100: u16 LE][pulse rate x 100: u16 LE]
//! ```

use crate::vitals::VitalsEstimate;

pub const PULSE_OXIMETER_SERVICE_UUID: u16 = 0x1822;
pub const PLX_SPOT_CHECK_CHAR_UUID: u16 = 0x2A5E;
pub const PLX_CONTINUOUS_CHAR_UUID: u16 = 0x2A5F;
pub const PLX_FEATURES_CHAR_UUID: u16 = 0x2A60;

pub const MEASUREMENT_LEN: usize = 5;

/// Characteristics exposed by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Indicated, one confirmed reading at a time
    SpotCheck,
    /// Notified, streaming readings
    Continuous,
    /// Read-only feature bitfield
    Features,
}

impl Characteristic {
    pub fn uuid(&self) -> u16 {
        match self {
            Characteristic::SpotCheck => PLX_SPOT_CHECK_CHAR_UUID,
            Characteristic::Continuous => PLX_CONTINUOUS_CHAR_UUID,
            Characteristic::Features => PLX_FEATURES_CHAR_UUID,
        }
    }
}

/// Scale a value by 100 and round, saturating into `u16`.
fn scaled(value: f64) -> u16 {
    (value * 100.0).round() as u16
}

pub fn encode(spo2: f64, bpm: f64) -> [u8; MEASUREMENT_LEN] {
    let spo2 = scaled(spo2).to_le_bytes();
    let bpm = scaled(bpm).to_le_bytes();
    [0, spo2[0], spo2[1], bpm[0], bpm[1]]
}

pub fn encode_estimate(estimate: &VitalsEstimate) -> [u8; MEASUREMENT_LEN] {
    encode(estimate.spo2, estimate.bpm)
}

/// Reverse of `encode`; `None` unless `bytes` is exactly one measurement.
pub fn decode_measurement(bytes: &[u8]) -> Option<VitalsEstimate> {
    if bytes.len() != MEASUREMENT_LEN {
        return None;
    }
    let spo2 = u16::from_le_bytes([bytes[1], bytes[2]]);
    let bpm = u16::from_le_bytes([bytes[3], bytes[4]]);
    Some(VitalsEstimate {
        spo2: f64::from(spo2) / 100.0,
        bpm: f64::from(bpm) / 100.0,
    })
}

pub fn encode_features(features: u32) -> [u8; 4] {
    features.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reference_payload() {
        // 9850 = 0x267A, 7225 = 0x1C39
        assert_eq!(encode(98.5, 72.25), [0x00, 0x7A, 0x26, 0x39, 0x1C]);
    }

    #[test]
    fn test_encode_rounds_to_nearest() {
        // 97.996 * 100 = 9799.6 -> 9800
        assert_eq!(encode(97.996, 0.0), [0x00, 0x48, 0x26, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_saturates() {
        let bytes = encode(-5.0, 1000.0);
        assert_eq!(&bytes[1..3], &[0x00, 0x00]);
        assert_eq!(&bytes[3..5], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_measurement() {
        let reading = decode_measurement(&[0x00, 0x7A, 0x26, 0x39, 0x1C]).unwrap();
        assert!((reading.spo2 - 98.5).abs() < 1e-9);
        assert!((reading.bpm - 72.25).abs() < 1e-9);
        assert!(decode_measurement(&[0x00, 0x7A, 0x26]).is_none());
    }

    #[test]
    fn test_characteristic_uuids() {
        assert_eq!(Characteristic::SpotCheck.uuid(), 0x2A5E);
        assert_eq!(Characteristic::Continuous.uuid(), 0x2A5F);
        assert_eq!(Characteristic::Features.uuid(), 0x2A60);
    }

    #[test]
    fn test_encode_features_little_endian() {
        assert_eq!(encode_features(0x0102_0304), [0x04, 0x03, 0x02, 0x01]);
    }
}

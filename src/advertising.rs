//! # Advertising Payload
//!
//! Builds and parses the length-prefixed, type-tagged advertising data
//! broadcast while no central is connected. Every field is laid out as
//! `[len + 1][type][value...]`.

use crate::error::AdvertisingError;

pub const ADV_TYPE_FLAGS: u8 = 0x01;
pub const ADV_TYPE_UUID16_COMPLETE: u8 = 0x03;
pub const ADV_TYPE_UUID32_COMPLETE: u8 = 0x05;
pub const ADV_TYPE_UUID128_COMPLETE: u8 = 0x07;
pub const ADV_TYPE_NAME: u8 = 0x09;
pub const ADV_TYPE_APPEARANCE: u8 = 0x19;

/// Generic Pulse Oximeter appearance category
pub const APPEARANCE_GENERIC_PULSE_OXIMETER: u16 = 0x0C40;

/// Longest value that fits behind a one-byte length prefix
const MAX_FIELD_VALUE: usize = 254;

/// Service identifier as carried in advertising data.
///
/// 128-bit identifiers are kept in over-the-air (little-endian) byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128([u8; 16]),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingData {
    pub limited_discoverable: bool,
    pub br_edr: bool,
    pub name: Option<String>,
    pub services: Vec<ServiceId>,
    pub appearance: Option<u16>,
}

impl AdvertisingData {
    pub fn encode(&self) -> Result<Vec<u8>, AdvertisingError> {
        let mut payload = Vec::new();

        let flags = (if self.limited_discoverable { 0x01 } else { 0x02 })
            + (if self.br_edr { 0x18 } else { 0x04 });
        append_field(&mut payload, ADV_TYPE_FLAGS, &[flags])?;

        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            append_field(&mut payload, ADV_TYPE_NAME, name.as_bytes())?;
        }

        for service in &self.services {
            match service {
                ServiceId::Uuid16(id) => {
                    append_field(&mut payload, ADV_TYPE_UUID16_COMPLETE, &id.to_le_bytes())?
                }
                ServiceId::Uuid32(id) => {
                    append_field(&mut payload, ADV_TYPE_UUID32_COMPLETE, &id.to_le_bytes())?
                }
                ServiceId::Uuid128(bytes) => {
                    append_field(&mut payload, ADV_TYPE_UUID128_COMPLETE, bytes)?
                }
            }
        }

        if let Some(appearance) = self.appearance.filter(|&a| a != 0) {
            append_field(&mut payload, ADV_TYPE_APPEARANCE, &appearance.to_le_bytes())?;
        }

        Ok(payload)
    }
}

fn append_field(payload: &mut Vec<u8>, adv_type: u8, value: &[u8]) -> Result<(), AdvertisingError> {
    if value.len() > MAX_FIELD_VALUE {
        return Err(AdvertisingError::FieldTooLong {
            field_type: adv_type,
            len: value.len(),
        });
    }
    payload.push(value.len() as u8 + 1);
    payload.push(adv_type);
    payload.extend_from_slice(value);
    Ok(())
}

/// Values of every field of type `adv_type`, in payload order.
pub fn decode_field(payload: &[u8], adv_type: u8) -> Vec<&[u8]> {
    let mut result = Vec::new();
    let mut i = 0;
    while i + 1 < payload.len() {
        let len = payload[i] as usize;
        if len == 0 {
            i += 1;
            continue;
        }
        let end = (i + 1 + len).min(payload.len());
        if payload[i + 1] == adv_type {
            result.push(&payload[i + 2..end]);
        }
        i += 1 + len;
    }
    result
}

/// First name field, or an empty string when none is present.
pub fn decode_name(payload: &[u8]) -> String {
    decode_field(payload, ADV_TYPE_NAME)
        .first()
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_default()
}

pub fn decode_services(payload: &[u8]) -> Vec<ServiceId> {
    let mut services = Vec::new();
    for field in decode_field(payload, ADV_TYPE_UUID16_COMPLETE) {
        services.extend(
            field
                .chunks_exact(2)
                .map(|c| ServiceId::Uuid16(u16::from_le_bytes([c[0], c[1]]))),
        );
    }
    for field in decode_field(payload, ADV_TYPE_UUID32_COMPLETE) {
        services.extend(
            field
                .chunks_exact(4)
                .map(|c| ServiceId::Uuid32(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))),
        );
    }
    for field in decode_field(payload, ADV_TYPE_UUID128_COMPLETE) {
        for chunk in field.chunks_exact(16) {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(chunk);
            services.push(ServiceId::Uuid128(bytes));
        }
    }
    services
}

#[cfg(test)]
pub fn decode_appearance(payload: &[u8]) -> Option<u16> {
    decode_field(payload, ADV_TYPE_APPEARANCE)
        .first()
        .filter(|v| v.len() == 2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> AdvertisingData {
        AdvertisingData {
            name: Some(name.to_string()),
            ..AdvertisingData::default()
        }
    }

    #[test]
    fn test_pulse_oximeter_payload_bytes() {
        let data = AdvertisingData {
            name: Some("PulseOx".to_string()),
            services: vec![ServiceId::Uuid16(0x1822)],
            ..AdvertisingData::default()
        };
        let payload = data.encode().unwrap();
        assert_eq!(
            payload,
            vec![
                0x02, 0x01, 0x06, // flags: general discoverable, BR/EDR not supported
                0x08, 0x09, b'P', b'u', b'l', b's', b'e', b'O', b'x', //
                0x03, 0x03, 0x22, 0x18,
            ]
        );
    }

    #[test]
    fn test_flags_variants() {
        let data = AdvertisingData {
            limited_discoverable: true,
            br_edr: true,
            ..AdvertisingData::default()
        };
        assert_eq!(data.encode().unwrap(), vec![0x02, 0x01, 0x19]);
    }

    #[test]
    fn test_name_round_trip() {
        let longest = "a".repeat(248);
        for name in ["X", "PicoW_Oximeter", longest.as_str()] {
            let payload = named(name).encode().unwrap();
            assert_eq!(decode_name(&payload), name);
        }
    }

    #[test]
    fn test_missing_name_decodes_empty() {
        let payload = AdvertisingData::default().encode().unwrap();
        assert_eq!(decode_name(&payload), "");
    }

    #[test]
    fn test_name_too_long() {
        let result = named(&"a".repeat(255)).encode();
        assert_eq!(
            result,
            Err(AdvertisingError::FieldTooLong {
                field_type: ADV_TYPE_NAME,
                len: 255
            })
        );
    }

    #[test]
    fn test_services_round_trip() {
        let uuid128 = [
            0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56,
            0x34, 0x12,
        ];
        let services = vec![
            ServiceId::Uuid16(0x1822),
            ServiceId::Uuid16(0x180F),
            ServiceId::Uuid32(0xDEAD_BEEF),
            ServiceId::Uuid128(uuid128),
        ];
        let data = AdvertisingData {
            name: Some("Ox".to_string()),
            services: services.clone(),
            appearance: Some(APPEARANCE_GENERIC_PULSE_OXIMETER),
            ..AdvertisingData::default()
        };
        let payload = data.encode().unwrap();

        assert_eq!(decode_services(&payload), services);
        assert_eq!(decode_appearance(&payload), Some(0x0C40));
        assert_eq!(decode_name(&payload), "Ox");
    }

    #[test]
    fn test_decode_field_tolerates_truncation() {
        // Name field claims 5 value bytes but only 2 are present
        let payload = [0x02, 0x01, 0x06, 0x06, 0x09, b'A', b'B'];
        assert_eq!(decode_field(&payload, ADV_TYPE_NAME), vec![&b"AB"[..]]);
    }
}

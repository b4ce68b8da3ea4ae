//! Decoder for the Govee H5102 advertisement payload.
//!
//! The H5102 broadcasts its measurements in the manufacturer-specific data of
//! every advertisement. The payload as seen on air (company identifier
//! included) looks like this:
//!
//! | offset | meaning                                            |
//! |--------|----------------------------------------------------|
//! | 0..2   | company identifier, little-endian                  |
//! | 2..4   | unused                                             |
//! | 4..7   | packed temperature/humidity, big-endian 24-bit     |
//! | 7      | battery level in percent                           |
//!
//! The packed value `V` holds `temperature * 10000 + humidity * 10` with bit
//! 23 acting as a sign flag for the temperature.
//!
//! Both quantities are derived with truncating integer division before being
//! converted to `f64`. That throws away the decimal digit the sensor actually
//! transmits, but it is how the readings have always been produced and the
//! exported series must stay comparable with historic data.

use crate::reading::Reading;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Advertised local name prefix of H5102 sensors (e.g. `GVH5102_A1B2`).
pub const H5102_NAME_PREFIX: &str = "GVH5102";

/// Shortest payload that still contains the battery byte.
pub const MIN_PAYLOAD_LEN: usize = 8;

/// Set in the packed value when the temperature is below zero.
const NEGATIVE_FLAG: u32 = 0x80_0000;

/// Errors produced while decoding a single advertisement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The advertised name does not belong to a supported device.
    #[error("advertisement from wrong device type: {0:?}")]
    WrongDeviceType(String),
    /// The payload is too short to contain a reading.
    #[error("malformed payload: {len} bytes, need at least 8")]
    MalformedPayload { len: usize },
}

/// Turns one advertisement into a [`Reading`].
pub trait AdvertisementParser: Send + Sync {
    /// Decode the manufacturer data of an advertisement named `name`.
    fn parse(&self, name: &str, payload: &[u8]) -> Result<Reading, DecodeError>;
}

/// Parser for the Govee H5102 payload format.
#[derive(Debug, Default, Clone, Copy)]
pub struct H5102Parser;

impl AdvertisementParser for H5102Parser {
    fn parse(&self, name: &str, payload: &[u8]) -> Result<Reading, DecodeError> {
        decode_h5102(name, payload)
    }
}

/// Supported device models, selected in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    /// Govee H5102 thermo-hygrometer
    #[default]
    H5102,
}

impl DeviceModel {
    /// Parser for this model's payload.
    pub fn parser(self) -> Arc<dyn AdvertisementParser> {
        match self {
            DeviceModel::H5102 => Arc::new(H5102Parser),
        }
    }

    /// Prefix of the advertised name used to filter beacons during a scan.
    pub fn name_prefix(self) -> &'static str {
        match self {
            DeviceModel::H5102 => H5102_NAME_PREFIX,
        }
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceModel::H5102 => write!(f, "h5102"),
        }
    }
}

/// Decode an H5102 advertisement.
///
/// # Errors
/// * [`DecodeError::WrongDeviceType`] if `name` does not start with
///   [`H5102_NAME_PREFIX`], regardless of the payload.
/// * [`DecodeError::MalformedPayload`] if `payload` is shorter than
///   [`MIN_PAYLOAD_LEN`].
pub fn decode_h5102(name: &str, payload: &[u8]) -> Result<Reading, DecodeError> {
    if !name.starts_with(H5102_NAME_PREFIX) {
        return Err(DecodeError::WrongDeviceType(name.to_string()));
    }
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::MalformedPayload { len: payload.len() });
    }

    let packed = u32::from_be_bytes([0, payload[4], payload[5], payload[6]]);

    Ok(Reading {
        temperature_c: f64::from(temperature(packed)),
        humidity_pct: f64::from(humidity(packed)),
        battery_pct: payload[7],
    })
}

/// Whole degrees, truncated towards zero.
fn temperature(packed: u32) -> i32 {
    if packed & NEGATIVE_FLAG != 0 {
        // At most 23 bits remain, so the cast cannot overflow.
        -(((packed ^ NEGATIVE_FLAG) / 10_000) as i32)
    } else {
        (packed / 10_000) as i32
    }
}

/// Whole percent. Computed on the packed value including the sign flag.
fn humidity(packed: u32) -> u32 {
    (packed % 1000) / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    /// On-air payload with company id 0x0001 and the given packed value.
    fn payload(packed: [u8; 3], battery: u8) -> Vec<u8> {
        vec![0x01, 0x00, 0x01, 0x01, packed[0], packed[1], packed[2], battery]
    }

    #[test]
    fn decodes_positive_temperature() {
        // 0x01062B = 67115
        let reading = decode_h5102("GVH5102_1A2B", &payload([0x01, 0x06, 0x2B], 87)).unwrap();
        assert_eq!(reading.temperature_c, 6.0);
        assert_eq!(reading.humidity_pct, 11.0);
        assert_eq!(reading.battery_pct, 87);
    }

    #[test]
    fn decodes_typical_room_reading() {
        // 0x03B1E2 = 242146 -> 24 C, 14 %
        let reading = decode_h5102("GVH5102_1A2B", &payload([0x03, 0xB1, 0xE2], 100)).unwrap();
        assert_eq!(reading.temperature_c, 24.0);
        assert_eq!(reading.humidity_pct, 14.0);
        assert_eq!(reading.battery_pct, 100);
    }

    #[test]
    fn negative_flag_below_one_degree_truncates_to_zero() {
        // 0x800190: flag set, 0x190 = 400 -> -(400 / 10000) = 0
        let reading = decode_h5102("GVH5102_1A2B", &payload([0x80, 0x01, 0x90], 50)).unwrap();
        assert_eq!(reading.temperature_c, 0.0);
        assert!(reading.temperature_c.is_sign_positive());
        // Humidity keeps using the flagged value: 0x800190 = 8389008, 8 / 10 = 0
        assert_eq!(reading.humidity_pct, 0.0);
    }

    #[test]
    fn decodes_negative_temperature() {
        // 0x81E3B4 ^ 0x800000 = 0x01E3B4 = 123828 -> -12 C
        let reading = decode_h5102("GVH5102_1A2B", &payload([0x81, 0xE3, 0xB4], 64)).unwrap();
        assert_eq!(reading.temperature_c, -12.0);
        // 0x81E3B4 = 8512436, 436 / 10 = 43
        assert_eq!(reading.humidity_pct, 43.0);
    }

    #[test]
    fn ignores_bytes_past_battery() {
        let mut long = payload([0x01, 0x06, 0x2B], 87);
        long.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert_eq!(
            decode_h5102("GVH5102", &long).unwrap(),
            decode_h5102("GVH5102", &long[..MIN_PAYLOAD_LEN]).unwrap()
        );
    }

    #[test]
    fn wrong_name_fails_regardless_of_payload() {
        for data in [vec![], vec![0u8; 3], payload([0x01, 0x06, 0x2B], 87)] {
            assert_eq!(
                decode_h5102("OtherDevice", &data),
                Err(DecodeError::WrongDeviceType("OtherDevice".to_string()))
            );
        }
        assert!(matches!(
            decode_h5102("gvh5102_lowercase", &payload([0, 0, 0], 0)),
            Err(DecodeError::WrongDeviceType(_))
        ));
    }

    #[test]
    fn short_payload_is_malformed() {
        for len in 0..MIN_PAYLOAD_LEN {
            assert_eq!(
                decode_h5102("GVH5102-xyz", &vec![0u8; len]),
                Err(DecodeError::MalformedPayload { len })
            );
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let data = payload([0x03, 0xB1, 0xE2], 100);
        let first = H5102Parser.parse("GVH5102_1A2B", &data);
        for _ in 0..10 {
            assert_eq!(H5102Parser.parse("GVH5102_1A2B", &data), first);
        }
    }

    #[test]
    fn device_model_selects_h5102() {
        let model = DeviceModel::default();
        assert_eq!(model, DeviceModel::H5102);
        assert_eq!(model.name_prefix(), "GVH5102");
        assert_eq!(model.to_string(), "h5102");

        let parser = model.parser();
        let reading = parser
            .parse("GVH5102_1A2B", &payload([0x01, 0x06, 0x2B], 87))
            .unwrap();
        assert_eq!(reading.temperature_c, 6.0);
    }

    #[test]
    fn decode_error_display() {
        assert_eq!(
            DecodeError::WrongDeviceType("Foo".into()).to_string(),
            "advertisement from wrong device type: \"Foo\""
        );
        assert_eq!(
            DecodeError::MalformedPayload { len: 3 }.to_string(),
            "malformed payload: 3 bytes, need at least 8"
        );
    }
}

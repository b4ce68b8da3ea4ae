//! Bluetooth device address used as the routing key for sensors.
//!
//! Addresses come from two places: the configuration file (as text) and the
//! scanner backend (as raw bytes). Both end up as the same compact
//! [`MacAddress`] so lookups never depend on string casing.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as six bytes, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMacError {
    #[error("invalid MAC address {0:?}: expected six octets separated by ':' or '-'")]
    InvalidLength(String),
    #[error("invalid MAC address {address:?}: octet {octet:?} is not two hex digits")]
    InvalidOctet { address: String, octet: String },
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Accepts `AA:BB:CC:DD:EE:FF` and `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let separator = if s.contains('-') { '-' } else { ':' };
        let octets: Vec<&str> = s.split(separator).collect();
        if octets.len() != 6 {
            return Err(ParseMacError::InvalidLength(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (byte, octet) in bytes.iter_mut().zip(&octets) {
            let valid = octet.len() == 2 && octet.bytes().all(|b| b.is_ascii_hexdigit());
            if !valid {
                return Err(ParseMacError::InvalidOctet {
                    address: s.to_string(),
                    octet: octet.to_string(),
                });
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| ParseMacError::InvalidOctet {
                address: s.to_string(),
                octet: octet.to_string(),
            })?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

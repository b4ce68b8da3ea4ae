//! Decoded H5102 reading.

/// A single reading decoded from an H5102 advertisement.
///
/// Values are whole units: the legacy decoder truncates before converting to
/// floating point, so `temperature_c` and `humidity_pct` never carry a
/// fractional part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in Celsius
    pub temperature_c: f64,
    /// Relative humidity in percent (0-100)
    pub humidity_pct: f64,
    /// Battery level in percent (0-100)
    pub battery_pct: u8,
}

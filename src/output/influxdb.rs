//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::sensor::Sensor;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // A clock before 1970 cannot be expressed; leave the timestamp to the server.
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Emits one point per sensor with a fresh reading, timestamped with the
/// time the reading was received. Stale sensors produce no output.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl Default for InfluxDbFormatter {
    fn default() -> Self {
        Self::new("govee".to_string())
    }
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(sensor: &Sensor) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("mac".to_string(), sensor.address().to_string()),
            ("name".to_string(), sensor.name().to_string()),
        ])
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, sensor: &Sensor) -> Option<String> {
        let snapshot = sensor.fresh_snapshot()?;
        let reading = snapshot.reading;

        let field_set = BTreeMap::from([
            (
                "temperature".to_string(),
                FieldValue::Float(reading.temperature_c),
            ),
            ("humidity".to_string(), FieldValue::Float(reading.humidity_pct)),
            (
                "battery".to_string(),
                FieldValue::Integer(i64::from(reading.battery_pct)),
            ),
        ]);

        let point = DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::tag_set(sensor),
            field_set,
            timestamp: Some(snapshot.received_at),
        };
        Some(point.to_string())
    }
}

//! Prometheus text exposition formatter.
//!
//! Renders one gauge sample per quantity, labelled with the sensor name:
//!
//! ```text
//! sensor_govee_temperature{name="kitchen"} 24
//! sensor_govee_humidity{name="kitchen"} 14
//! sensor_govee_battery_level{name="kitchen"} 100
//! ```
//!
//! A stale sensor reports `NaN` for every gauge, so scrapers see the series
//! go away instead of a frozen last value.

use crate::output::OutputFormatter;
use crate::sensor::Sensor;

/// Prometheus gauge formatter.
#[derive(Debug, Clone)]
pub struct PrometheusFormatter {
    /// Metric name prefix, `<namespace>_<subsystem>`
    prefix: String,
}

impl Default for PrometheusFormatter {
    fn default() -> Self {
        Self::new("sensor", "govee")
    }
}

impl PrometheusFormatter {
    pub fn new(namespace: &str, subsystem: &str) -> Self {
        Self {
            prefix: format!("{namespace}_{subsystem}"),
        }
    }
}

/// Escape a label value: backslash, double quote and newline.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Sample value in exposition syntax.
fn sample(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        value.to_string()
    }
}

impl OutputFormatter for PrometheusFormatter {
    fn format(&self, sensor: &Sensor) -> Option<String> {
        let reading = sensor.fresh_snapshot().map(|s| s.reading);
        let gauges = [
            ("temperature", reading.map(|r| r.temperature_c)),
            ("humidity", reading.map(|r| r.humidity_pct)),
            ("battery_level", reading.map(|r| f64::from(r.battery_pct))),
        ];
        let name = escape_label(sensor.name());

        let lines: Vec<String> = gauges
            .into_iter()
            .map(|(metric, value)| {
                let value = value.unwrap_or(f64::NAN);
                format!("{}_{}{{name=\"{}\"}} {}", self.prefix, metric, name, sample(value))
            })
            .collect();
        Some(lines.join("\n"))
    }
}

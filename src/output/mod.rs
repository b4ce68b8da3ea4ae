//! Output formatters for sensor state.
//!
//! This module provides a trait for rendering the current state of a sensor
//! and implementations for the Prometheus text exposition format and the
//! InfluxDB line protocol.

pub mod influxdb;
pub mod prometheus;

use crate::sensor::Sensor;

/// Trait for rendering a sensor's state into text.
pub trait OutputFormatter: Send + Sync {
    /// Format the current state of `sensor`.
    ///
    /// Returns `None` when the format has nothing to say about the sensor
    /// in its current state.
    fn format(&self, sensor: &Sensor) -> Option<String>;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Prometheus text exposition, stale sensors reported as NaN
    #[default]
    Prometheus,
    /// InfluxDB line protocol, sensors without a fresh reading are skipped
    Influxdb,
}

impl OutputFormat {
    pub fn formatter(self) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Prometheus => Box::new(prometheus::PrometheusFormatter::default()),
            OutputFormat::Influxdb => Box::new(influxdb::InfluxDbFormatter::default()),
        }
    }
}

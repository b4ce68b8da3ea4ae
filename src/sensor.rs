//! Per-sensor state and the actor that keeps it fresh.
//!
//! A [`Sensor`] is shared between its [`SensorActor`], the only writer, and
//! any number of readers such as the status reporter or a metrics exporter.
//! The reading and the time it was received live in one [`Snapshot`] behind
//! a per-sensor [`RwLock`], so readers always observe a matching pair and
//! never wait on one another.
//!
//! The numeric accessors return `NaN` while no reading is available. Treat
//! it as "unknown", not as a measurement.

use crate::decoder::{AdvertisementParser, DecodeError};
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use crate::scanner::Beacon;
use log::{debug, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The latest reading together with when it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub reading: Reading,
    /// Monotonic receive time, used for staleness
    pub updated_at: Instant,
    /// Wall-clock receive time, used when exporting
    pub received_at: SystemTime,
}

impl Snapshot {
    /// Whether this reading is younger than `max_age`. Without a maximum
    /// age a reading stays fresh forever.
    pub fn is_fresh(&self, max_age: Option<Duration>) -> bool {
        max_age.is_none_or(|max_age| self.updated_at.elapsed() <= max_age)
    }
}

/// A tracked H5102 sensor.
#[derive(Debug)]
pub struct Sensor {
    name: String,
    address: MacAddress,
    max_age: Option<Duration>,
    state: RwLock<Option<Snapshot>>,
}

impl Sensor {
    /// A sensor without a reading. Without a maximum age a reading never
    /// goes stale once received.
    pub fn new(name: impl Into<String>, address: MacAddress) -> Self {
        Self {
            name: name.into(),
            address,
            max_age: None,
            state: RwLock::new(None),
        }
    }

    /// Treat readings older than `max_age` as stale.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        *self.state.read()
    }

    pub fn reading(&self) -> Option<Reading> {
        self.snapshot().map(|s| s.reading)
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.snapshot().map(|s| s.updated_at)
    }

    /// Time since the last successful update.
    pub fn age(&self) -> Option<Duration> {
        self.last_update().map(|at| at.elapsed())
    }

    /// Temperature in Celsius, `NaN` if unknown.
    pub fn temperature(&self) -> f64 {
        self.reading().map_or(f64::NAN, |r| r.temperature_c)
    }

    /// Relative humidity in percent, `NaN` if unknown.
    pub fn humidity(&self) -> f64 {
        self.reading().map_or(f64::NAN, |r| r.humidity_pct)
    }

    /// Battery level in percent, `NaN` if unknown.
    pub fn battery_level(&self) -> f64 {
        self.reading()
            .map_or(f64::NAN, |r| f64::from(r.battery_pct))
    }

    /// `true` until the first reading arrives, and afterwards whenever the
    /// reading is older than the configured maximum age.
    pub fn is_stale(&self) -> bool {
        self.fresh_snapshot().is_none()
    }

    /// The current snapshot, unless it is missing or stale.
    ///
    /// Renderers should take this once instead of calling the accessors one
    /// by one, which may straddle a concurrent update.
    pub fn fresh_snapshot(&self) -> Option<Snapshot> {
        self.snapshot().filter(|s| s.is_fresh(self.max_age))
    }

    /// Replace the reading and its timestamps in one step.
    pub(crate) fn publish(&self, reading: Reading) {
        let snapshot = Snapshot {
            reading,
            updated_at: Instant::now(),
            received_at: SystemTime::now(),
        };
        *self.state.write() = Some(snapshot);
    }
}

/// Consumes the beacons routed to one sensor and publishes decoded readings.
pub struct SensorActor {
    sensor: Arc<Sensor>,
    parser: Arc<dyn AdvertisementParser>,
    inbox: mpsc::Receiver<Beacon>,
}

impl SensorActor {
    pub fn new(
        sensor: Arc<Sensor>,
        parser: Arc<dyn AdvertisementParser>,
        inbox: mpsc::Receiver<Beacon>,
    ) -> Self {
        Self {
            sensor,
            parser,
            inbox,
        }
    }

    pub fn sensor(&self) -> &Arc<Sensor> {
        &self.sensor
    }

    /// Decode `beacon` and publish the reading.
    ///
    /// A beacon that fails to decode is logged and dropped; the previous
    /// reading stays in place.
    pub fn on_beacon(&self, beacon: &Beacon) {
        match self.parser.parse(&beacon.name, &beacon.payload) {
            Ok(reading) => {
                debug!(
                    "{}: {} C, {} %, battery {} %",
                    self.sensor.name,
                    reading.temperature_c,
                    reading.humidity_pct,
                    reading.battery_pct
                );
                self.sensor.publish(reading);
            }
            Err(e @ DecodeError::WrongDeviceType(_)) => {
                debug!("{}: {}", self.sensor.name, e);
            }
            Err(e @ DecodeError::MalformedPayload { .. }) => {
                warn!("{}: {} ({:02X?})", self.sensor.name, e, beacon.payload);
            }
        }
    }

    /// Process beacons in arrival order until the inbox closes or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                beacon = self.inbox.recv() => match beacon {
                    Some(beacon) => self.on_beacon(&beacon),
                    None => break,
                },
            }
        }
        debug!("actor for sensor {} stopped", self.sensor.name);
    }
}

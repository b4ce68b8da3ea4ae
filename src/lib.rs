//! `govee-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup and process
//! exit codes. The pipeline lives here: a [`scheduler::ScanScheduler`] opens
//! periodic scan windows, a [`router::Router`] hands each beacon to the
//! [`sensor::SensorActor`] owning its address, and actors decode payloads
//! into the shared [`sensor::Sensor`] state that [`status`] reports render.

pub mod app;
pub mod config;
pub mod decoder;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod router;
pub mod scanner;
pub mod scheduler;
pub mod sensor;
pub mod status;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError, SensorConfig};
pub use decoder::{AdvertisementParser, DecodeError, DeviceModel, H5102Parser, decode_h5102};
pub use mac_address::MacAddress;
pub use output::{OutputFormat, OutputFormatter};
pub use reading::Reading;
pub use router::{Dispatch, Router};
pub use scanner::{Backend, Beacon, ScanContext, ScanError, Scanner};
pub use scheduler::{ScanOptions, ScanOutcome, ScanScheduler, SchedulerStats};
pub use sensor::{Sensor, SensorActor};

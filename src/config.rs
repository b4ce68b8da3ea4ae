//! YAML configuration.
//!
//! ```yaml
//! scan_duration: 15s        # optional, default 15s
//! scan_interval: 5m         # optional, default 5m
//! stale_after: 20m          # optional, default 3 scan intervals
//! stale_after_intervals: 3  # optional, used when stale_after is absent, 0 disables
//! inbox_capacity: 16        # optional, default 16
//! report_interval: 1m       # optional, no periodic report when absent
//! model: h5102              # optional, default h5102
//! sensors:
//!   - name: kitchen
//!     address: "A4:C1:38:0D:0E:05"
//! ```
//!
//! The loaded [`Config`] is validated once and then passed by value into
//! the components; nothing reads configuration after startup.

use crate::decoder::DeviceModel;
use crate::mac_address::MacAddress;
use crate::router::DEFAULT_INBOX_CAPACITY;
use crate::scheduler::ScanOptions;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[inline]
fn default_scan_duration() -> Duration {
    Duration::from_secs(15)
}
#[inline]
fn default_scan_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
#[inline]
fn default_stale_after_intervals() -> u32 {
    3
}
#[inline]
fn default_inbox_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

/// Directory below `$HOME` searched for the config file.
pub const HOME_CONFIG_DIR: &str = ".govee-listener";

/// File name searched for when no path is given.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Candidate config files in search order: `$HOME/.govee-listener/config.yaml`,
/// then `config.yaml` in the working directory.
pub fn search_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(2);
    if let Some(home) = home {
        paths.push(home.join(HOME_CONFIG_DIR).join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    paths
}

/// The first candidate that exists.
pub fn locate(candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound {
            searched: candidates.to_vec(),
        })
}

/// Errors returned while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no config file found, looked for {}", join_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("stale_after_intervals times scan_interval does not fit in a duration")]
    StaleAfterOverflow,
    #[error("no sensors configured")]
    NoSensors,
    #[error("sensor name {0:?} is used more than once")]
    DuplicateName(String),
    #[error("sensor address {0} is used more than once")]
    DuplicateAddress(MacAddress),
}

/// One tracked sensor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub name: String,
    pub address: MacAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    // Length of each scan window
    #[serde(default = "default_scan_duration", with = "humantime_serde")]
    pub scan_duration: Duration,
    // Time between the starts of two scan windows
    #[serde(default = "default_scan_interval", with = "humantime_serde")]
    pub scan_interval: Duration,
    // Explicit maximum reading age, takes precedence over stale_after_intervals
    #[serde(default, with = "humantime_serde")]
    pub stale_after: Option<Duration>,
    // Maximum reading age in scan intervals, 0 keeps readings fresh forever
    #[serde(default = "default_stale_after_intervals")]
    pub stale_after_intervals: u32,
    // Beacons buffered per sensor before new ones are dropped
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    // Period of the status report written to stdout
    #[serde(default, with = "humantime_serde")]
    pub report_interval: Option<Duration>,
    #[serde(default)]
    pub model: DeviceModel,
    pub sensors: Vec<SensorConfig>,
}

impl Config {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_duration.is_zero() {
            return Err(ConfigError::Zero("scan_duration"));
        }
        if self.scan_interval.is_zero() {
            return Err(ConfigError::Zero("scan_interval"));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Zero("inbox_capacity"));
        }
        if self.stale_after.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Zero("stale_after"));
        }
        if self.report_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Zero("report_interval"));
        }
        if self.stale_after.is_none()
            && self
                .scan_interval
                .checked_mul(self.stale_after_intervals)
                .is_none()
        {
            return Err(ConfigError::StaleAfterOverflow);
        }
        if self.sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for sensor in &self.sensors {
            if !names.insert(sensor.name.as_str()) {
                return Err(ConfigError::DuplicateName(sensor.name.clone()));
            }
            if !addresses.insert(sensor.address) {
                return Err(ConfigError::DuplicateAddress(sensor.address));
            }
        }
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            duration: self.scan_duration,
            interval: self.scan_interval,
        }
    }

    /// Age after which a reading counts as stale, `None` if it never does.
    pub fn max_age(&self) -> Option<Duration> {
        match (self.stale_after, self.stale_after_intervals) {
            (Some(explicit), _) => Some(explicit),
            (None, 0) => None,
            // Overflow is rejected by validate.
            (None, intervals) => Some(self.scan_interval.saturating_mul(intervals)),
        }
    }
}

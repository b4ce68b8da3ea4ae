//! Core application runner for `govee-listener`.
//!
//! Process exit codes stay in `main.rs`. [`App`] takes any [`Scanner`] and
//! any writer, so tests drive the whole pipeline with a fake scanner and
//! paused time.

use crate::config::{self, Config, ConfigError};
use crate::output::{OutputFormat, OutputFormatter};
use crate::router::Router;
use crate::scanner::{self, Backend, ScanError, Scanner};
use crate::scheduler::{ScanScheduler, SchedulerStats};
use crate::sensor::{Sensor, SensorActor};
use crate::status;
use clap::Parser;
use log::{error, info};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Path of the YAML configuration file. When absent,
    /// `$HOME/.govee-listener/config.yaml` and then `./config.yaml` are tried.
    #[arg(short, long, env = "GOVEE_LISTENER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bluetooth scanner backend to use
    #[arg(long, env = "GOVEE_LISTENER_BACKEND", default_value_t, value_enum)]
    pub backend: Backend,

    /// Write a status report to stdout at this period, overriding the
    /// config file. Accepts durations like 30s, 1m, 1h 30m.
    #[arg(long, env = "GOVEE_LISTENER_REPORT_INTERVAL", value_parser = humantime::parse_duration)]
    pub report_interval: Option<Duration>,

    /// Format of the status report
    #[arg(long, env = "GOVEE_LISTENER_FORMAT", default_value_t, value_enum)]
    pub format: OutputFormat,

    /// Verbose output, log every decoded reading and dropped beacon
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    /// The config file to load: `--config` if given, else the first file
    /// found in the search path below `home`.
    pub fn config_path(&self, home: Option<&Path>) -> Result<PathBuf, ConfigError> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config::locate(&config::search_paths(home)),
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The assembled pipeline: sensors, their actors, the router and the scheduler.
pub struct App {
    sensors: Vec<Arc<Sensor>>,
    actors: Vec<SensorActor>,
    scheduler: ScanScheduler,
    report_interval: Option<Duration>,
    formatter: Box<dyn OutputFormatter>,
}

impl App {
    /// Build one sensor, inbox and actor per configured device.
    pub fn new(config: &Config, scanner: Arc<dyn Scanner>, format: OutputFormat) -> Self {
        let parser = config.model.parser();
        let max_age = config.max_age();
        let mut router = Router::new();
        let mut sensors = Vec::with_capacity(config.sensors.len());
        let mut actors = Vec::with_capacity(config.sensors.len());

        for entry in &config.sensors {
            let sensor = Arc::new(Sensor::new(&entry.name, entry.address).with_max_age(max_age));
            let inbox = router.register(&entry.name, entry.address, config.inbox_capacity);
            actors.push(SensorActor::new(sensor.clone(), parser.clone(), inbox));
            sensors.push(sensor);
        }

        let scheduler = ScanScheduler::new(
            scanner,
            Arc::new(router),
            config.scan_options(),
            config.model.name_prefix(),
        );

        Self {
            sensors,
            actors,
            scheduler,
            report_interval: config.report_interval,
            formatter: format.formatter(),
        }
    }

    /// Shared handles for external readers of sensor state.
    pub fn sensors(&self) -> &[Arc<Sensor>] {
        &self.sensors
    }

    /// Run the pipeline until `cancel` fires, writing status reports to `out`.
    ///
    /// Actors run as separate tasks; the scheduler and the reporter run on
    /// the calling task. A failing report writer is logged and only stops
    /// the reporter.
    pub async fn run(
        self,
        cancel: CancellationToken,
        out: &mut dyn Write,
    ) -> Result<SchedulerStats, RunError> {
        let App {
            sensors,
            actors,
            scheduler,
            report_interval,
            formatter,
        } = self;

        let mut tasks = JoinSet::new();
        for actor in actors {
            tasks.spawn(actor.run(cancel.clone()));
        }
        info!("tracking {} sensors", sensors.len());

        let reporter = async {
            let Some(period) = report_interval else {
                return;
            };
            if let Err(e) =
                status::run_reporter(&sensors, formatter.as_ref(), period, cancel.clone(), out)
                    .await
            {
                error!("status report failed, reporting stopped: {e}");
            }
        };
        let (stats, ()) = tokio::join!(scheduler.run(cancel.clone()), reporter);

        // The scheduler only returns once cancelled; make sure the actors follow.
        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("sensor actor failed: {e}");
            }
        }

        info!(
            "stopped after {} scans ({} failed)",
            stats.scans, stats.failures
        );
        Ok(stats)
    }
}

/// Cancel `cancel` when the process receives Ctrl-C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("signal received, shutting down"),
            Err(e) => error!("failed to listen for Ctrl-C, shutting down: {e}"),
        }
        cancel.cancel();
    });
}

/// Load the configuration, bring up the scanner backend and run until Ctrl-C.
pub async fn run(options: Options) -> Result<(), RunError> {
    let path = options.config_path(dirs::home_dir().as_deref())?;
    info!("reading config file {}", path.display());
    let mut config = Config::load(&path)?;
    if options.report_interval.is_some() {
        config.report_interval = options.report_interval;
        config.validate()?;
    }

    let scanner = scanner::connect(options.backend).await?;
    let app = App::new(&config, scanner, options.format);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    app.run(cancel, &mut io::stdout()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeScanner, KITCHEN, PORCH, beacon};
    use clap::CommandFactory;
    use tokio::time::sleep;

    const CONFIG: &str = r#"
scan_duration: 15s
scan_interval: 5m
report_interval: 1m
sensors:
  - name: kitchen
    address: "A4:C1:38:0D:0E:05"
  - name: porch
    address: "A4:C1:38:5A:11:7C"
"#;

    #[tokio::test(start_paused = true)]
    async fn readings_flow_from_scanner_to_sensors() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let stranger = crate::mac_address::MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0, 1]);
        let scanner = Arc::new(FakeScanner::new(vec![
            beacon(KITCHEN, [0x03, 0xB1, 0xE2], 100),
            beacon(stranger, [0x01, 0x06, 0x2B], 50),
        ]));
        let app = App::new(&config, scanner.clone(), OutputFormat::Prometheus);
        let sensors = app.sensors().to_vec();
        assert_eq!(sensors.len(), 2);

        let cancel = CancellationToken::new();
        let mut out = Vec::<u8>::new();
        let canceller = {
            let cancel = cancel.clone();
            async move {
                sleep(Duration::from_secs(90)).await;
                cancel.cancel();
            }
        };
        let (stats, ()) = tokio::join!(app.run(cancel, &mut out), canceller);
        let stats = stats.unwrap();

        assert_eq!(stats, SchedulerStats { scans: 1, failures: 0 });
        assert_eq!(scanner.calls(), 1);

        let kitchen = &sensors[0];
        assert_eq!(kitchen.address(), KITCHEN);
        assert!(!kitchen.is_stale());
        assert_eq!(kitchen.temperature(), 24.0);
        assert_eq!(kitchen.humidity(), 14.0);
        assert_eq!(kitchen.battery_level(), 100.0);

        let porch = &sensors[1];
        assert_eq!(porch.address(), PORCH);
        assert!(porch.is_stale());
        assert!(porch.temperature().is_nan());

        // One report at 60s.
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("sensor_govee_temperature{name=\"kitchen\"} 24\n"));
        assert!(out.contains("sensor_govee_battery_level{name=\"porch\"} NaN\n"));
        assert_eq!(out.lines().count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn scanner_failures_do_not_stop_the_app() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let scanner = Arc::new(
            FakeScanner::new(vec![beacon(PORCH, [0x01, 0x06, 0x2B], 77)]).failing_on(&[0]),
        );
        let app = App::new(&config, scanner.clone(), OutputFormat::Influxdb);
        let sensors = app.sensors().to_vec();

        let cancel = CancellationToken::new();
        let mut out = Vec::<u8>::new();
        let canceller = {
            let cancel = cancel.clone();
            async move {
                // First window fails, the second one at 300s succeeds.
                sleep(Duration::from_secs(320)).await;
                cancel.cancel();
            }
        };
        let (stats, ()) = tokio::join!(app.run(cancel, &mut out), canceller);

        assert_eq!(stats.unwrap(), SchedulerStats { scans: 2, failures: 1 });
        assert_eq!(sensors[1].temperature(), 6.0);
        assert_eq!(sensors[1].battery_level(), 77.0);

        // Influx output skips sensors without readings: the five reports
        // before 300s are empty, the one at 300s may or may not see porch.
        let out = String::from_utf8(out).unwrap();
        assert!(out.lines().all(|line| line.contains("name=porch")));
        assert!(!out.contains("name=kitchen"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_report_without_interval() {
        let mut config = Config::from_yaml(CONFIG).unwrap();
        config.report_interval = None;
        let app = App::new(&config, Arc::new(FakeScanner::new(vec![])), OutputFormat::Prometheus);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut out = Vec::<u8>::new();
        let stats = app.run(cancel, &mut out).await.unwrap();

        assert_eq!(stats.scans, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn options_parse() {
        let options = Options::try_parse_from([
            "govee-listener",
            "--config",
            "/etc/govee.yaml",
            "--report-interval",
            "1m 30s",
            "--format",
            "influxdb",
            "-v",
        ])
        .unwrap();
        assert_eq!(options.config, Some(PathBuf::from("/etc/govee.yaml")));
        assert_eq!(
            options.config_path(None).unwrap(),
            PathBuf::from("/etc/govee.yaml")
        );
        assert_eq!(options.report_interval, Some(Duration::from_secs(90)));
        assert_eq!(options.format, OutputFormat::Influxdb);
        assert_eq!(options.backend, Backend::Bluer);
        assert!(options.verbose);
    }

    #[test]
    fn options_defaults() {
        let options = Options::try_parse_from(["govee-listener"]).unwrap();
        assert_eq!(options.config, None);
        assert_eq!(options.report_interval, None);
        assert_eq!(options.format, OutputFormat::Prometheus);
        assert!(!options.verbose);
    }

    #[test]
    fn settings_can_come_from_environment() {
        let command = Options::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|name| name.to_string_lossy().into_owned())
        };
        assert_eq!(env_of("config").as_deref(), Some("GOVEE_LISTENER_CONFIG"));
        assert_eq!(
            env_of("report_interval").as_deref(),
            Some("GOVEE_LISTENER_REPORT_INTERVAL")
        );
        assert_eq!(env_of("format").as_deref(), Some("GOVEE_LISTENER_FORMAT"));
        assert_eq!(env_of("backend").as_deref(), Some("GOVEE_LISTENER_BACKEND"));
    }

    #[test]
    fn config_path_searches_home_without_flag() {
        let home = std::env::temp_dir().join(format!("govee-listener-home-{}", std::process::id()));
        let dir = home.join(config::HOME_CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join(config::CONFIG_FILE_NAME);
        std::fs::write(&file, CONFIG).unwrap();

        let options = Options {
            config: None,
            ..Options::try_parse_from(["govee-listener"]).unwrap()
        };
        assert_eq!(options.config_path(Some(&home)).unwrap(), file);

        std::fs::remove_dir_all(&home).unwrap();
    }

    #[tokio::test]
    async fn run_fails_on_missing_config() {
        let options = Options::try_parse_from(["govee-listener", "-c", "/nonexistent.yaml"]).unwrap();
        let err = run(options).await.unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::Open { .. })));
    }
}

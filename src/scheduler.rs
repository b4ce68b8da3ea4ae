//! Periodic scan windows.
//!
//! The scheduler alternates between idling and scanning:
//!
//! ```text
//! start -> Scanning -(deadline | error)-> Idle -(interval tick)-> Scanning ...
//!             \                            /
//!              `------(cancelled)---------'--> stopped
//! ```
//!
//! The first window opens immediately. Each window lasts at most
//! `duration`, and windows start every `interval`. A failing scan is logged
//! and retried at the next tick; only cancellation ends the loop.

use crate::router::Router;
use crate::scanner::{Beacon, ScanContext, ScanError, Scanner};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Timing of scan windows. Both durations must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Length of a single scan window
    pub duration: Duration,
    /// Time between the starts of two consecutive windows
    pub interval: Duration,
}

/// How a single scan window ended.
#[derive(Debug)]
pub enum ScanOutcome {
    /// The backend finished before the deadline.
    Completed,
    /// The window ran for its full duration.
    DeadlineExceeded,
    /// The process is shutting down.
    Cancelled,
    /// The backend reported an error.
    Failed(ScanError),
}

impl From<Result<(), ScanError>> for ScanOutcome {
    fn from(result: Result<(), ScanError>) -> Self {
        match result {
            Ok(()) => ScanOutcome::Completed,
            Err(ScanError::DeadlineExceeded) => ScanOutcome::DeadlineExceeded,
            Err(ScanError::Cancelled) => ScanOutcome::Cancelled,
            Err(other) => ScanOutcome::Failed(other),
        }
    }
}

/// Counters returned when the scheduler stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Scan windows opened
    pub scans: u64,
    /// Windows that ended with a backend error
    pub failures: u64,
}

/// Drives scan windows and routes what they observe.
pub struct ScanScheduler {
    scanner: Arc<dyn Scanner>,
    router: Arc<Router>,
    options: ScanOptions,
    name_prefix: String,
}

impl ScanScheduler {
    /// Only beacons whose advertised name starts with `name_prefix` are routed.
    pub fn new(
        scanner: Arc<dyn Scanner>,
        router: Arc<Router>,
        options: ScanOptions,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            scanner,
            router,
            options,
            name_prefix: name_prefix.into(),
        }
    }

    /// Run scan windows until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> SchedulerStats {
        let mut ticker = interval(self.options.interval);
        // A window that overruns the interval pushes the schedule back
        // instead of triggering back-to-back catch-up scans.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = SchedulerStats::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("scheduler stopped while idle");
                    break;
                }
                _ = ticker.tick() => {}
            }

            stats.scans += 1;
            match self.scan_once(&cancel).await {
                ScanOutcome::Completed => info!("scan finished early"),
                ScanOutcome::DeadlineExceeded => info!("scan done"),
                ScanOutcome::Cancelled => {
                    info!("scan canceled, scheduler stopped");
                    break;
                }
                ScanOutcome::Failed(e) => {
                    stats.failures += 1;
                    error!("scan failed, retrying in {:?}: {}", self.options.interval, e);
                }
            }
        }

        stats
    }

    /// Run a single scan window and dispatch every matching beacon.
    pub async fn scan_once(&self, cancel: &CancellationToken) -> ScanOutcome {
        info!(
            "scanning for {}...",
            humantime::format_duration(self.options.duration)
        );
        let ctx = ScanContext::new(self.options.duration, cancel.clone());

        let prefix = self.name_prefix.as_str();
        let filter = |beacon: &Beacon| beacon.name.starts_with(prefix);
        let router = self.router.as_ref();
        let on_beacon = |beacon: &Beacon| {
            router.dispatch(&beacon.address, beacon);
        };

        self.scanner.scan(ctx, &filter, &on_beacon).await.into()
    }
}

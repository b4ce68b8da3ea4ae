//! Periodic status report.
//!
//! Every `period` the reporter renders all sensors with the configured
//! [`OutputFormatter`] and writes the result to its output, one block per
//! report. The first report is written one period after startup, once the
//! first scan window had a chance to fill in readings.

use crate::output::OutputFormatter;
use crate::sensor::Sensor;
use log::debug;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Write one report covering `sensors` to `out`.
pub fn write_report(
    sensors: &[Arc<Sensor>],
    formatter: &dyn OutputFormatter,
    out: &mut dyn Write,
) -> io::Result<()> {
    for sensor in sensors {
        if let Some(text) = formatter.format(sensor) {
            writeln!(out, "{text}")?;
        }
    }
    out.flush()
}

/// Write a report every `period` until `cancel` fires.
///
/// # Errors
/// Returns the first I/O error; the caller decides whether that is fatal.
pub async fn run_reporter(
    sensors: &[Arc<Sensor>],
    formatter: &dyn OutputFormatter,
    period: Duration,
    cancel: CancellationToken,
    out: &mut dyn Write,
) -> io::Result<()> {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let stale = sensors.iter().filter(|s| s.is_stale()).count();
        debug!("reporting {} sensors ({} stale)", sensors.len(), stale);
        write_report(sensors, formatter, out)?;
    }

    Ok(())
}

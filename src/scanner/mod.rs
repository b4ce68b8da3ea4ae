//! BLE scanner abstraction.
//!
//! A [`Scanner`] runs one bounded discovery window: it reports every beacon
//! that passes the caller's filter to the caller's callback, and returns when
//! the [`ScanContext`] deadline passes or its cancellation token fires.
//! Backends are selected with [`Backend`] and compiled in through cargo
//! features.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// A raw advertisement observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Advertised local name
    pub name: String,
    /// Manufacturer-specific data as sent on air, company identifier first
    pub payload: Vec<u8>,
    /// Address of the advertising device
    pub address: MacAddress,
}

/// Ways a scan window can end other than running to completion.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The window's deadline passed. This is how a healthy scan ends.
    #[error("scan deadline exceeded")]
    DeadlineExceeded,
    /// The window was cancelled, usually because the process is shutting down.
    #[error("scan cancelled")]
    Cancelled,
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Deadline and cancellation for a single scan window.
#[derive(Debug, Clone)]
pub struct ScanContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl ScanContext {
    /// A window lasting `duration` from now.
    pub fn new(duration: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + duration,
            cancel,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `discovery` until it finishes, the deadline passes or the
    /// window is cancelled, whichever comes first.
    ///
    /// Cancellation wins over an expired deadline, and both win over a
    /// discovery future that happens to be ready at the same time.
    pub async fn bound<F>(&self, discovery: F) -> Result<(), ScanError>
    where
        F: Future<Output = Result<(), ScanError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
            _ = sleep_until(self.deadline) => Err(ScanError::DeadlineExceeded),
            result = discovery => result,
        }
    }
}

/// Predicate applied to every observed beacon before it reaches the callback.
pub type BeaconFilter<'a> = &'a (dyn Fn(&Beacon) -> bool + Send + Sync);

/// Callback invoked synchronously for each beacon that passed the filter.
pub type BeaconCallback<'a> = &'a (dyn Fn(&Beacon) + Send + Sync);

/// Future returned by [`Scanner::scan`].
pub type ScanFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + 'a>>;

/// Transport abstraction so the scheduler can be tested without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    /// Run one discovery window bounded by `ctx`.
    ///
    /// Implementations report the reason the window ended: normally
    /// [`ScanError::DeadlineExceeded`] or [`ScanError::Cancelled`], which
    /// [`ScanContext::bound`] produces for them.
    fn scan<'a>(
        &'a self,
        ctx: ScanContext,
        filter: BeaconFilter<'a>,
        on_beacon: BeaconCallback<'a>,
    ) -> ScanFuture<'a>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[default]
    Bluer,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Bluer => write!(f, "bluer"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bluer" | "bluez" => Ok(Backend::Bluer),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Initialise the Bluetooth adapter for `backend`.
///
/// # Errors
/// Returns `ScanError::BackendNotAvailable` if the backend was not compiled
/// in, or `ScanError::Bluetooth` if the adapter cannot be brought up.
pub async fn connect(backend: Backend) -> Result<Arc<dyn Scanner>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Arc::new(bluer::BluerScanner::new().await?)),
        #[cfg(not(feature = "bluer"))]
        Backend::Bluer => Err(ScanError::BackendNotAvailable(backend.to_string())),
    }
}

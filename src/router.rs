//! Static routing of beacons to sensor actors.
//!
//! The table is filled once at startup and shared read-only with the scan
//! scheduler afterwards, so lookups need no locking. Every tracked sensor
//! gets a bounded inbox; delivery never waits for a slow actor. When an
//! inbox is full the incoming beacon is dropped (drop-newest): the sensor
//! keeps its previous reading and will pick up one of the next
//! advertisements instead.

use crate::mac_address::MacAddress;
use crate::scanner::Beacon;
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default capacity of each sensor's inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 16;

/// What happened to a dispatched beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued in the sensor's inbox.
    Delivered,
    /// No tracked sensor has this address.
    Unknown,
    /// The sensor's inbox was full; the beacon was dropped.
    QueueFull,
    /// The sensor's actor has stopped.
    Closed,
}

#[derive(Debug)]
struct Route {
    name: String,
    inbox: mpsc::Sender<Beacon>,
}

/// Address to inbox table for tracked sensors.
#[derive(Debug, Default)]
pub struct Router {
    routes: HashMap<MacAddress, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route for the sensor `name` at `address` and return the
    /// receiving end of its inbox.
    ///
    /// Registering an address twice replaces the earlier route; its actor
    /// then sees its inbox closed.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn register(
        &mut self,
        name: &str,
        address: MacAddress,
        capacity: usize,
    ) -> mpsc::Receiver<Beacon> {
        let (inbox, receiver) = mpsc::channel(capacity);
        let route = Route {
            name: name.to_string(),
            inbox,
        };
        if let Some(previous) = self.routes.insert(address, route) {
            warn!(
                "address {} registered for both {} and {}",
                address, previous.name, name
            );
        }
        receiver
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.routes.contains_key(address)
    }

    /// Hand `beacon` to the sensor registered for `address`.
    ///
    /// Never blocks and never fails; the returned [`Dispatch`] only reports
    /// what happened.
    pub fn dispatch(&self, address: &MacAddress, beacon: &Beacon) -> Dispatch {
        let Some(route) = self.routes.get(address) else {
            info!("ignoring beacon {:?} from untracked device {}", beacon.name, address);
            return Dispatch::Unknown;
        };

        match route.inbox.try_send(beacon.clone()) {
            Ok(()) => Dispatch::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!("inbox of sensor {} is full, dropping beacon", route.name);
                Dispatch::QueueFull
            }
            Err(TrySendError::Closed(_)) => {
                debug!("sensor {} is no longer listening, dropping beacon", route.name);
                Dispatch::Closed
            }
        }
    }
}

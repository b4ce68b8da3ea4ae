//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to talk to the BlueZ daemon via
//! D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ strips the company identifier from manufacturer data and hands it
//! out as a map key. The decoder works on offsets of the on-air payload, so
//! the identifier is written back in front of the data (little-endian, as
//! transmitted) before the beacon is reported.

use super::{Beacon, BeaconCallback, BeaconFilter, ScanContext, ScanError, ScanFuture, Scanner};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use log::{debug, info};
use std::collections::HashMap;
use std::pin::pin;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scanner backed by the default BlueZ adapter.
pub struct BluerScanner {
    // Keeps the D-Bus connection alive for as long as the adapter is used.
    _session: Session,
    adapter: Adapter,
}

impl BluerScanner {
    /// Power on the default adapter and configure LE discovery.
    ///
    /// Duplicate reporting is enabled so that every advertisement of an
    /// already known sensor surfaces as a change event.
    pub async fn new() -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await?;
        info!("using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// Report beacons until the event stream ends.
    ///
    /// Discovery stops when the stream is dropped, which is what happens
    /// when [`ScanContext::bound`] abandons this future.
    async fn discover(
        &self,
        filter: BeaconFilter<'_>,
        on_beacon: BeaconCallback<'_>,
    ) -> Result<(), ScanError> {
        let mut events = pin!(self.adapter.discover_devices_with_changes().await?);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            match self.read_beacon(address).await {
                Ok(Some(beacon)) if filter(&beacon) => on_beacon(&beacon),
                Ok(_) => {}
                Err(e) => debug!("failed to read advertisement of {address}: {e}"),
            }
        }

        Ok(())
    }

    /// Read the current name and manufacturer data of `address`.
    ///
    /// Returns `None` for devices that advertise neither.
    async fn read_beacon(&self, address: Address) -> Result<Option<Beacon>, bluer::Error> {
        let device = self.adapter.device(address)?;
        let Some(name) = device.name().await? else {
            return Ok(None);
        };
        let Some(manufacturer_data) = device.manufacturer_data().await? else {
            return Ok(None);
        };

        Ok(on_air_payload(manufacturer_data).map(|payload| Beacon {
            name,
            payload,
            address: address.into(),
        }))
    }
}

impl Scanner for BluerScanner {
    fn scan<'a>(
        &'a self,
        ctx: ScanContext,
        filter: BeaconFilter<'a>,
        on_beacon: BeaconCallback<'a>,
    ) -> ScanFuture<'a> {
        Box::pin(async move { ctx.bound(self.discover(filter, on_beacon)).await })
    }
}

/// Rebuild the payload as transmitted: company id (little-endian) followed
/// by its data. With several entries the lowest company id wins.
fn on_air_payload(manufacturer_data: HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (company, data) = manufacturer_data.into_iter().min_by_key(|(id, _)| *id)?;
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.extend_from_slice(&company.to_le_bytes());
    payload.extend_from_slice(&data);
    Some(payload)
}

use crate::mac_address::MacAddress;
use crate::scanner::{Beacon, BeaconCallback, BeaconFilter, ScanContext, ScanError, ScanFuture, Scanner};
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const KITCHEN: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x0D, 0x0E, 0x05]);
pub const PORCH: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x5A, 0x11, 0x7C]);

/// An H5102 beacon from `address` carrying the packed value and battery level.
pub fn beacon(address: MacAddress, packed: [u8; 3], battery: u8) -> Beacon {
    Beacon {
        name: format!("GVH5102_{:02X}{:02X}", address.0[4], address.0[5]),
        payload: vec![0x01, 0x00, 0x01, 0x01, packed[0], packed[1], packed[2], battery],
        address,
    }
}

/// Scanner that replays the same beacons in every window, then idles until
/// the window's deadline or cancellation. Selected calls fail instead.
#[derive(Debug, Default)]
pub struct FakeScanner {
    beacons: Vec<Beacon>,
    failing: Vec<usize>,
    calls: AtomicUsize,
}

impl FakeScanner {
    pub fn new(beacons: Vec<Beacon>) -> Self {
        Self {
            beacons,
            ..Default::default()
        }
    }

    /// Make the calls with these zero-based indices fail with a Bluetooth error.
    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.failing = calls.to_vec();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scanner for FakeScanner {
    fn scan<'a>(
        &'a self,
        ctx: ScanContext,
        filter: BeaconFilter<'a>,
        on_beacon: BeaconCallback<'a>,
    ) -> ScanFuture<'a> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&call) {
                return Err(ScanError::Bluetooth("adapter disappeared".to_string()));
            }
            for beacon in &self.beacons {
                if filter(beacon) {
                    on_beacon(beacon);
                }
            }
            ctx.bound(pending()).await
        })
    }
}

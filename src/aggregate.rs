use std::collections::HashMap;

use mac_address::MacAddress;

use crate::messages::{AggregatedDevice, RawObservation};

/// Running per-address signal sums for one capture window.
#[derive(Debug, Default)]
pub struct SignalAggregator {
    readings: HashMap<[u8; 6], (f64, usize)>,
}

impl SignalAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: RawObservation) {
        let entry = self
            .readings
            .entry(observation.source.bytes())
            .or_insert((0.0, 0));
        entry.0 += observation.signal_dbm;
        entry.1 += 1;
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// One device per address, ordered by address so later stages see a
    /// stable input.
    pub fn finish(self) -> Vec<AggregatedDevice> {
        let mut devices: Vec<AggregatedDevice> = self
            .readings
            .into_iter()
            .map(|(bytes, (sum, samples))| AggregatedDevice {
                address: MacAddress::new(bytes),
                mean_signal_dbm: sum / samples as f64,
                samples,
            })
            .collect();
        devices.sort_by_key(|d| d.address.bytes());
        devices
    }
}

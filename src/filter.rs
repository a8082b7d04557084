use std::cmp::Ordering;

use crate::messages::ClassifiedDevice;

/// Share of people who carry a detectable phone (US / Canada estimate).
pub const DEFAULT_CORRECTION_FACTOR: f64 = 0.7;
pub const DEFAULT_PROXIMITY_THRESHOLD_DBM: f64 = -70.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceFilter {
    pub include_all_vendors: bool,
    pub proximity_only: bool,
    pub proximity_threshold_dbm: f64,
    pub correction_factor: f64,
    pub disable_correction: bool,
    pub sort_by_signal: bool,
}

impl Default for PresenceFilter {
    fn default() -> Self {
        PresenceFilter {
            include_all_vendors: true,
            proximity_only: false,
            proximity_threshold_dbm: DEFAULT_PROXIMITY_THRESHOLD_DBM,
            correction_factor: DEFAULT_CORRECTION_FACTOR,
            disable_correction: false,
            sort_by_signal: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub selected: Vec<ClassifiedDevice>,
    pub estimate: u64,
}

impl PresenceFilter {
    pub fn admits(&self, device: &ClassifiedDevice) -> bool {
        (self.include_all_vendors || device.mobile)
            && (!self.proximity_only || device.mean_signal_dbm > self.proximity_threshold_dbm)
    }

    pub fn effective_correction_factor(&self) -> f64 {
        if self.disable_correction {
            1.0
        } else {
            self.correction_factor
        }
    }

    pub fn estimate(&self, selected: usize) -> u64 {
        (selected as f64 / self.effective_correction_factor()).round() as u64
    }

    pub fn apply(&self, devices: Vec<ClassifiedDevice>) -> Selection {
        let mut selected: Vec<ClassifiedDevice> =
            devices.into_iter().filter(|d| self.admits(d)).collect();
        if self.sort_by_signal {
            selected.sort_by(|a, b| {
                b.mean_signal_dbm
                    .partial_cmp(&a.mean_signal_dbm)
                    .unwrap_or(Ordering::Equal)
            });
        }
        let estimate = self.estimate(selected.len());
        Selection { selected, estimate }
    }
}

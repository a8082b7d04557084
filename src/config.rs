use std::path::{Path, PathBuf};
use std::time::Duration;

use mac_address::MacAddress;
use serde_derive::Deserialize;

use crate::delivery::{DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_QUEUED_RECORDS};
use crate::error::ScanError;
use crate::filter::PresenceFilter;

pub const DEFAULT_INGEST_URL: &str = "http://games.protospace.ca:5000/wifi-scan";
pub const DEFAULT_SCAN_SECONDS: u64 = 60;
pub const DEFAULT_DICTIONARY: &str = "oui.txt";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub capture: Option<CaptureConfig>,
    pub vendors: Option<VendorsConfig>,
    pub filter: Option<FilterConfig>,
    pub delivery: Option<DeliveryConfig>,
    pub sink: Option<SinkConfig>,
    pub device: Option<DeviceConfig>,
    pub targets: Option<Vec<TargetDevice>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct CaptureConfig {
    pub adapter: Option<String>,
    pub duration_seconds: Option<u64>,
    pub tshark_path: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct VendorsConfig {
    pub dictionary: Option<PathBuf>,
    pub mobile: Option<Vec<String>>,
    pub mobile_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct FilterConfig {
    pub include_all_vendors: Option<bool>,
    pub proximity_only: Option<bool>,
    pub proximity_threshold_dbm: Option<f64>,
    pub correction_factor: Option<f64>,
    pub disable_correction: Option<bool>,
    pub sort_by_signal: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DeliveryConfig {
    pub timeout_seconds: Option<u64>,
    pub max_queued_records: Option<usize>,
    pub empty_scan: Option<EmptyScanPolicy>,
}

/// What a capture window with no parseable frames does to the process.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyScanPolicy {
    /// Log it, still drain the queue, try again next cycle.
    #[default]
    Skip,
    /// Treat it as fatal.
    Exit,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    Http(HttpConfig),
    Mqtt(MqttConfig),
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Http(HttpConfig {
            url: DEFAULT_INGEST_URL.to_string(),
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct HttpConfig {
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DeviceConfig {
    pub serial: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TargetDevice {
    pub address: MacAddress,
    pub name: String,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("couldn't read {path:?}: {e}")))?;
        toml::de::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("couldn't parse {path:?}: {e}")))
    }

    pub fn scan_duration(&self) -> Duration {
        let seconds = self
            .capture
            .as_ref()
            .and_then(|c| c.duration_seconds)
            .unwrap_or(DEFAULT_SCAN_SECONDS);
        Duration::from_secs(seconds)
    }

    pub fn dictionary_path(&self) -> PathBuf {
        self.vendors
            .as_ref()
            .and_then(|v| v.dictionary.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DICTIONARY))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.capture
            .as_ref()
            .and_then(|c| c.temp_dir.clone())
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery
            .as_ref()
            .and_then(|d| d.timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_DELIVERY_TIMEOUT)
    }

    pub fn max_queued_records(&self) -> usize {
        self.delivery
            .as_ref()
            .and_then(|d| d.max_queued_records)
            .unwrap_or(DEFAULT_MAX_QUEUED_RECORDS)
    }

    pub fn empty_scan(&self) -> EmptyScanPolicy {
        self.delivery
            .as_ref()
            .and_then(|d| d.empty_scan)
            .unwrap_or_default()
    }

    pub fn sink(&self) -> SinkConfig {
        self.sink.clone().unwrap_or_default()
    }

    pub fn presence_filter(&self) -> Result<PresenceFilter, ScanError> {
        let defaults = PresenceFilter::default();
        let Some(filter) = self.filter.as_ref() else {
            return Ok(defaults);
        };

        let correction_factor = filter.correction_factor.unwrap_or(defaults.correction_factor);
        if !correction_factor.is_finite() || correction_factor <= 0.0 {
            return Err(ScanError::Config(format!(
                "correction_factor must be a positive number, got {correction_factor}"
            )));
        }

        Ok(PresenceFilter {
            include_all_vendors: filter
                .include_all_vendors
                .unwrap_or(defaults.include_all_vendors),
            proximity_only: filter.proximity_only.unwrap_or(defaults.proximity_only),
            proximity_threshold_dbm: filter
                .proximity_threshold_dbm
                .unwrap_or(defaults.proximity_threshold_dbm),
            correction_factor,
            disable_correction: filter
                .disable_correction
                .unwrap_or(defaults.disable_correction),
            sort_by_signal: filter.sort_by_signal.unwrap_or(defaults.sort_by_signal),
        })
    }
}

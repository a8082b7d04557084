use mac_address::MacAddress;
use serde_derive::Serialize;

/// One frame as reported by the extraction tool.
#[derive(Clone, Debug, PartialEq)]
pub struct RawObservation {
    pub source: MacAddress,
    pub peer: Option<MacAddress>,
    pub signal_dbm: f64,
}

/// Mean signal strength of one address over a capture window.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedDevice {
    pub address: MacAddress,
    pub mean_signal_dbm: f64,
    pub samples: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedDevice {
    pub address: MacAddress,
    pub mean_signal_dbm: f64,
    pub vendor: String,
    pub mobile: bool,
}

/// A device that made it through the presence filter, in wire form.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectedDevice {
    #[serde(rename = "company")]
    pub vendor: String,
    #[serde(rename = "rssi")]
    pub signal_dbm: f64,
    #[serde(rename = "mac")]
    pub address: String,
}

impl From<&ClassifiedDevice> for SelectedDevice {
    fn from(device: &ClassifiedDevice) -> Self {
        SelectedDevice {
            vendor: device.vendor.clone(),
            signal_dbm: device.mean_signal_dbm,
            address: format_address(&device.address),
        }
    }
}

/// The document delivered to the remote sink once per cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OccupancyRecord {
    #[serde(rename = "records")]
    pub devices: Vec<SelectedDevice>,
    #[serde(rename = "time")]
    pub timestamp: i64,
    pub serial: String,
}

/// Lowercase colon-separated form, matching what the capture tool prints.
pub fn format_address(address: &MacAddress) -> String {
    address
        .bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

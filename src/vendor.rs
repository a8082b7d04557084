use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::debug;
use mac_address::MacAddress;

use crate::error::ScanError;
use crate::messages::{AggregatedDevice, ClassifiedDevice};

pub const NOT_IN_OUI: &str = "Not in OUI";

/// Vendors whose devices are most likely someone's phone.
pub const DEFAULT_MOBILE_VENDORS: &[&str] = &[
    "Motorola Mobility LLC, a Lenovo Company",
    "GUANGDONG OPPO MOBILE TELECOMMUNICATIONS CORP.,LTD",
    "Huawei Symantec Technologies Co.,Ltd.",
    "Microsoft",
    "HTC Corporation",
    "Samsung Electronics Co.,Ltd",
    "SAMSUNG ELECTRO-MECHANICS(THAILAND)",
    "BlackBerry RTS",
    "LG ELECTRONICS INC",
    "Apple, Inc.",
    "LG Electronics",
    "OnePlus Tech (Shenzhen) Ltd",
    "Xiaomi Communications Co Ltd",
    "LG Electronics (Mobile Communications)",
];

/// Read-only OUI → vendor name table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorDictionary {
    prefixes: HashMap<[u8; 3], String>,
}

impl VendorDictionary {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::DictionaryLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let dictionary = Self::parse(&text);
        if dictionary.is_empty() {
            return Err(ScanError::EmptyDictionary {
                path: path.to_path_buf(),
            });
        }
        debug!("Loaded {} vendor prefixes from {}", dictionary.len(), path.display());
        Ok(dictionary)
    }

    /// Accepts both the IEEE `oui.txt` layout and Wireshark's `manuf` file.
    /// Lines that don't start with a 24-bit prefix are ignored.
    pub fn parse(text: &str) -> Self {
        let prefixes = text.lines().filter_map(parse_entry).collect();
        VendorDictionary { prefixes }
    }

    pub fn lookup(&self, address: &MacAddress) -> Option<&str> {
        let bytes = address.bytes();
        self.prefixes
            .get(&[bytes[0], bytes[1], bytes[2]])
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

fn parse_entry(line: &str) -> Option<([u8; 3], String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (token, rest) = line.split_once(char::is_whitespace)?;
    let prefix = parse_prefix(token)?;

    let rest = rest.trim();
    let rest = rest
        .strip_prefix("(hex)")
        .or_else(|| rest.strip_prefix("(base 16)"))
        .unwrap_or(rest);
    let name = rest
        .split('\t')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .last()?;

    Some((prefix, name.to_string()))
}

fn parse_prefix(token: &str) -> Option<[u8; 3]> {
    let hex: String = token
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut prefix = [0u8; 3];
    for (i, byte) in prefix.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(prefix)
}

/// One vendor name per line.
pub fn load_mobile_vendors(path: &Path) -> Result<Vec<String>, ScanError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ScanError::Config(format!("couldn't read manufacturers file {path:?}: {e}"))
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub struct VendorClassifier {
    dictionary: VendorDictionary,
    mobile: HashSet<String>,
}

impl VendorClassifier {
    pub fn new<I>(dictionary: VendorDictionary, mobile: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        VendorClassifier {
            dictionary,
            mobile: mobile.into_iter().collect(),
        }
    }

    pub fn with_default_mobile(dictionary: VendorDictionary) -> Self {
        Self::new(
            dictionary,
            DEFAULT_MOBILE_VENDORS.iter().map(|v| v.to_string()),
        )
    }

    /// Same input order in, same order out.
    pub fn classify(&self, devices: &[AggregatedDevice]) -> Vec<ClassifiedDevice> {
        devices
            .iter()
            .map(|device| {
                let vendor = self
                    .dictionary
                    .lookup(&device.address)
                    .unwrap_or(NOT_IN_OUI)
                    .to_string();
                let mobile = self.mobile.contains(&vendor);
                ClassifiedDevice {
                    address: device.address,
                    mean_signal_dbm: device.mean_signal_dbm,
                    vendor,
                    mobile,
                }
            })
            .collect()
    }
}

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use mac_address::MacAddress;

use crate::config::TargetDevice;
use crate::error::ScanError;
use crate::messages::{ClassifiedDevice, SelectedDevice, format_address};

#[derive(clap::ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// "There are about N people around."
    #[default]
    Human,
    /// Just the estimate.
    Number,
    /// The selected devices as JSON.
    Json,
}

/// Everything printed or written locally about a cycle. Never affects what
/// gets delivered.
#[derive(Debug, Default, Clone)]
pub struct Reporter {
    mode: OutputMode,
    log_path: Option<PathBuf>,
    targets: Vec<TargetDevice>,
}

impl Reporter {
    pub fn new(mode: OutputMode, log_path: Option<PathBuf>, targets: Vec<TargetDevice>) -> Self {
        Reporter {
            mode,
            log_path,
            targets,
        }
    }

    /// Watched addresses seen this window.
    pub fn found_targets<'a>(&self, devices: &'a [ClassifiedDevice]) -> Vec<(&str, &'a ClassifiedDevice)> {
        devices
            .iter()
            .filter_map(|device| {
                self.targets
                    .iter()
                    .find(|t| t.address == device.address)
                    .map(|t| (t.name.as_str(), device))
            })
            .collect()
    }

    pub fn classified(&self, devices: &[ClassifiedDevice]) {
        for device in devices {
            debug!(
                "{} {} {}",
                format_address(&device.address),
                device.vendor,
                device.mobile
            );
        }
        for (name, device) in self.found_targets(devices) {
            println!(
                "Found {} ({}), rssi: {}",
                name,
                format_address(&device.address),
                device.mean_signal_dbm
            );
        }
    }

    pub fn selected(&self, devices: &[SelectedDevice], estimate: u64, time: f64) {
        match self.mode {
            OutputMode::Human => println!("{}", describe(estimate)),
            OutputMode::Number => println!("{estimate}"),
            OutputMode::Json => match serde_json::to_string_pretty(devices) {
                Ok(json) => println!("{json}"),
                Err(err) => warn!("Could not render devices: {err}"),
            },
        }

        if let Some(path) = &self.log_path {
            match append_log(path, devices, time) {
                Ok(()) => info!("Wrote {} records to {}", devices.len(), path.display()),
                Err(err) => warn!("Could not append to {}: {err}", path.display()),
            }
        }
    }
}

pub fn describe(estimate: u64) -> String {
    match estimate {
        0 => "No one around (not even you!).".to_string(),
        1 => "No one around, but you.".to_string(),
        n => format!("There are about {n} people around."),
    }
}

fn append_log(path: &Path, devices: &[SelectedDevice], time: f64) -> std::io::Result<()> {
    let line = serde_json::json!({ "cellphones": devices, "time": time });
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// One address per line, used as its own name.
pub fn load_targets(path: &Path) -> Result<Vec<TargetDevice>, ScanError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ScanError::Config(format!("couldn't read targets file {path:?}: {e}")))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<MacAddress>()
                .map(|address| TargetDevice {
                    address,
                    name: line.to_string(),
                })
                .map_err(|e| ScanError::Config(format!("bad address {line:?} in {path:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(address: &str, mean_signal_dbm: f64) -> ClassifiedDevice {
        ClassifiedDevice {
            address: address.parse().unwrap(),
            mean_signal_dbm,
            vendor: "Apple, Inc.".to_string(),
            mobile: true,
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(0), "No one around (not even you!).");
        assert_eq!(describe(1), "No one around, but you.");
        assert_eq!(describe(14), "There are about 14 people around.");
    }

    #[test]
    fn test_append_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.log");
        let reporter = Reporter::new(OutputMode::Number, Some(path.clone()), Vec::new());
        let devices = vec![SelectedDevice {
            vendor: "Apple, Inc.".to_string(),
            signal_dbm: -55.0,
            address: "f0:18:98:00:00:01".to_string(),
        }];

        reporter.selected(&devices, 1, 1_700_000_000.5);
        reporter.selected(&[], 0, 1_700_000_060.0);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["cellphones"][0]["mac"], "f0:18:98:00:00:01");
        assert_eq!(lines[0]["time"], 1_700_000_000.5);
        assert_eq!(lines[1]["cellphones"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_found_targets() {
        let reporter = Reporter::new(
            OutputMode::Human,
            None,
            vec![TargetDevice {
                address: "aa:bb:cc:11:22:33".parse().unwrap(),
                name: "Front desk".to_string(),
            }],
        );
        let devices = vec![
            classified("AA:BB:CC:11:22:33", -48.0),
            classified("aa:bb:cc:11:22:34", -60.0),
        ];
        let found = reporter.found_targets(&devices);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "Front desk");
        assert_eq!(found[0].1.mean_signal_dbm, -48.0);
    }

    #[test]
    fn test_load_targets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        std::fs::write(&path, "aa:bb:cc:11:22:33\n\nAA:BB:CC:11:22:34\n").unwrap();
        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].name, "AA:BB:CC:11:22:34");

        std::fs::write(&path, "not-a-mac\n").unwrap();
        assert!(matches!(load_targets(&path), Err(ScanError::Config(_))));
    }
}

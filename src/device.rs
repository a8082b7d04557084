use std::path::Path;

const UNKNOWN_SERIAL: &str = "0000000000000000";
const UNREADABLE_SERIAL: &str = "ERROR000000000";

/// The board serial from `/proc/cpuinfo` (Raspberry Pi style).
pub fn cpu_serial() -> String {
    read_cpu_serial(Path::new("/proc/cpuinfo"))
}

fn read_cpu_serial(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(cpuinfo) => parse_cpu_serial(&cpuinfo).unwrap_or_else(|| UNKNOWN_SERIAL.to_string()),
        Err(_) => UNREADABLE_SERIAL.to_string(),
    }
}

fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("Serial"))
        .filter_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .last()
}

use std::io::{BufRead as _, Write as _};
use std::path::Path;

use crate::error::ScanError;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// How the capture adapter gets chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterChoice {
    Explicit(String),
    Interactive,
}

impl AdapterChoice {
    pub async fn resolve(self) -> Result<String, ScanError> {
        match self {
            AdapterChoice::Explicit(adapter) => Ok(adapter),
            AdapterChoice::Interactive => tokio::task::spawn_blocking(prompt)
                .await
                .map_err(|e| ScanError::AdapterSelection(e.to_string()))?,
        }
    }
}

fn prompt() -> Result<String, ScanError> {
    let interfaces = list_interfaces(Path::new(SYS_CLASS_NET)).map_err(|e| {
        ScanError::AdapterSelection(format!(
            "couldn't list adapters ({e}), specify one with --adapter"
        ))
    })?;
    if interfaces.is_empty() {
        return Err(ScanError::AdapterSelection(
            "no network adapters found".to_string(),
        ));
    }

    let mut stderr = std::io::stderr().lock();
    writeln!(stderr, "Please choose the adapter you want to use:")?;
    for (i, name) in interfaces.iter().enumerate() {
        writeln!(stderr, "  {}) {}", i + 1, name)?;
    }
    write!(stderr, "> ")?;
    stderr.flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    pick(&interfaces, &answer)
        .ok_or_else(|| ScanError::AdapterSelection(format!("{:?} is not one of the choices", answer.trim())))
}

fn list_interfaces(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

/// A 1-based index or an exact name.
fn pick(interfaces: &[String], answer: &str) -> Option<String> {
    let answer = answer.trim();
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| interfaces.get(i))
            .cloned();
    }
    interfaces.iter().find(|name| *name == answer).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interfaces() -> Vec<String> {
        vec!["eth0".to_string(), "wlan0".to_string(), "wlan1".to_string()]
    }

    #[test]
    fn test_pick_by_index_and_name() {
        assert_eq!(pick(&interfaces(), "2\n"), Some("wlan0".to_string()));
        assert_eq!(pick(&interfaces(), " wlan1 "), Some("wlan1".to_string()));
        assert_eq!(pick(&interfaces(), "0"), None);
        assert_eq!(pick(&interfaces(), "4"), None);
        assert_eq!(pick(&interfaces(), "wlan9"), None);
    }

    #[test]
    fn test_list_interfaces_sorted_without_loopback() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["wlan1", "lo", "eth0"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        assert_eq!(list_interfaces(dir.path()).unwrap(), vec!["eth0", "wlan1"]);
    }

    #[tokio::test]
    async fn test_explicit_adapter() {
        let adapter = AdapterChoice::Explicit("mon0".to_string()).resolve().await.unwrap();
        assert_eq!(adapter, "mon0");
    }
}

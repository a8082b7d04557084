use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt as _};
use log::{debug, info, trace, warn};
use mac_address::MacAddress;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;

use crate::error::ScanError;
use crate::messages::RawObservation;
use crate::progress::ProgressObserver;

pub type LineStream<'a> = BoxStream<'a, std::io::Result<String>>;

/// The external programs that record frames and turn a recording into
/// `source<TAB>peer<TAB>signal[,signal]` lines.
pub trait CaptureTool: Send + Sync {
    fn record<'a>(
        &'a self,
        adapter: &'a str,
        duration: Duration,
        artifact: &'a Path,
    ) -> BoxFuture<'a, Result<(), ScanError>>;

    fn extract<'a>(&'a self, artifact: &'a Path) -> BoxFuture<'a, Result<LineStream<'a>, ScanError>>;
}

#[derive(Debug, Clone)]
pub struct Tshark {
    program: PathBuf,
}

impl Tshark {
    pub fn locate(configured: Option<&Path>) -> Result<Self, ScanError> {
        let program = match configured {
            Some(path) => is_executable(path).then(|| path.to_path_buf()),
            None => find_on_path("tshark"),
        };

        program
            .map(|program| Tshark { program })
            .ok_or_else(|| ScanError::ToolNotFound {
                tool: "tshark".to_string(),
                hint: install_hint().to_string(),
            })
    }
}

fn install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "brew install wireshark"
    } else {
        "apt-get install tshark"
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl CaptureTool for Tshark {
    fn record<'a>(
        &'a self,
        adapter: &'a str,
        duration: Duration,
        artifact: &'a Path,
    ) -> BoxFuture<'a, Result<(), ScanError>> {
        Box::pin(async move {
            let mut command = Command::new(&self.program);
            command
                .arg("-I")
                .arg("-i")
                .arg(adapter)
                .arg("-a")
                .arg(format!("duration:{}", duration.as_secs()))
                .arg("-w")
                .arg(artifact)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            debug!("Running {:?}", command);

            let output = command.output().await.map_err(|e| {
                ScanError::Capture(format!("failed to run {}: {e}", self.program.display()))
            })?;

            if !output.status.success() {
                warn!(
                    "Capture exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(())
        })
    }

    fn extract<'a>(&'a self, artifact: &'a Path) -> BoxFuture<'a, Result<LineStream<'a>, ScanError>> {
        Box::pin(async move {
            let mut command = Command::new(&self.program);
            command
                .arg("-r")
                .arg(artifact)
                .args(["-T", "fields"])
                .args(["-e", "wlan.sa", "-e", "wlan.bssid", "-e", "radiotap.dbm_antsignal"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            debug!("Running {:?}", command);

            let mut child = command.spawn().map_err(|e| {
                ScanError::Capture(format!("failed to run {}: {e}", self.program.display()))
            })?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ScanError::Capture("extraction output unavailable".to_string()))?;

            let lines = BufReader::new(stdout).lines();
            let stream = stream::unfold(Some((child, lines)), |state| async move {
                let (mut child, mut lines) = state?;
                match lines.next_line().await {
                    Ok(Some(line)) => Some((Ok(line), Some((child, lines)))),
                    Ok(None) => {
                        match child.wait().await {
                            Ok(status) if !status.success() => {
                                warn!("Extraction exited with {status}")
                            }
                            Ok(_) => {}
                            Err(err) => warn!("Error waiting for extraction: {err}"),
                        }
                        None
                    }
                    Err(err) => Some((Err(err), None)),
                }
            });
            Ok(stream.boxed())
        })
    }
}

/// A recording on disk. Temporary recordings are removed when the guard is
/// dropped, on every exit path; replay files supplied by the user are not.
#[derive(Debug)]
pub struct CaptureArtifact {
    path: PathBuf,
    owned: bool,
}

impl CaptureArtifact {
    pub fn temporary(dir: &Path) -> Self {
        CaptureArtifact {
            path: dir.join(format!("wifi-occupancy-{}.pcapng", std::process::id())),
            owned: true,
        }
    }

    pub fn replay(path: PathBuf) -> Self {
        CaptureArtifact { path, owned: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CaptureArtifact {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Could not remove {}: {err}", self.path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSource {
    Live { adapter: String, duration: Duration },
    Replay(PathBuf),
}

impl CaptureSource {
    fn label(&self) -> String {
        match self {
            CaptureSource::Live { adapter, .. } => adapter.clone(),
            CaptureSource::Replay(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub lines: usize,
    pub observations: usize,
    pub skipped: usize,
}

pub struct CaptureSession<T> {
    tool: T,
    temp_dir: PathBuf,
    progress: Option<Box<dyn ProgressObserver>>,
}

impl<T: CaptureTool> CaptureSession<T> {
    pub fn new(tool: T, temp_dir: PathBuf) -> Self {
        CaptureSession {
            tool,
            temp_dir,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressObserver>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Capture (or replay) one window, feeding each parsed frame to
    /// `on_observation` as soon as its line is read.
    pub async fn run<F>(&self, source: &CaptureSource, mut on_observation: F) -> Result<CaptureStats, ScanError>
    where
        F: FnMut(RawObservation),
    {
        let artifact = match source {
            CaptureSource::Live { adapter, duration } => {
                let artifact = CaptureArtifact::temporary(&self.temp_dir);
                info!(
                    "Using {} adapter and scanning for {} seconds...",
                    adapter,
                    duration.as_secs()
                );
                let _progress = self.progress.as_ref().map(|p| p.begin(*duration));
                self.tool.record(adapter, *duration, artifact.path()).await?;
                artifact
            }
            CaptureSource::Replay(path) => CaptureArtifact::replay(path.clone()),
        };

        let mut stats = CaptureStats::default();
        let mut lines = self.tool.extract(artifact.path()).await?;
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| ScanError::Capture(format!("reading extraction output: {e}")))?;
            stats.lines += 1;
            match parse_line(&line) {
                Ok(Some(observation)) => {
                    stats.observations += 1;
                    on_observation(observation);
                }
                Ok(None) => {}
                Err(reason) => {
                    stats.skipped += 1;
                    trace!("Skipping {line:?}: {reason:?}");
                }
            }
        }
        drop(lines);
        drop(artifact);

        debug!(
            "Read {} lines, {} observations, {} skipped",
            stats.lines, stats.observations, stats.skipped
        );
        if stats.observations == 0 {
            return Err(ScanError::NoSignalsFound {
                adapter: source.label(),
            });
        }
        Ok(stats)
    }
}

#[derive(Debug, PartialEq)]
enum MalformedLine {
    FieldCount(usize),
    Address,
    Signal,
}

/// `Ok(None)` for blank lines.
fn parse_line(line: &str) -> Result<Option<RawObservation>, MalformedLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() != 3 {
        return Err(MalformedLine::FieldCount(fields.len()));
    }

    let address = fields[0].split(',').next().unwrap_or_default();
    if !address.contains(':') {
        return Err(MalformedLine::Address);
    }
    let source: MacAddress = address.parse().map_err(|_| MalformedLine::Address)?;
    let peer = fields[1].split(',').next().and_then(|p| p.parse().ok());

    let readings = fields[2]
        .split(',')
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| MalformedLine::Signal)?;
    if readings.is_empty() || readings.iter().any(|r| !r.is_finite()) {
        return Err(MalformedLine::Signal);
    }
    let signal_dbm = readings.iter().sum::<f64>() / readings.len() as f64;

    Ok(Some(RawObservation {
        source,
        peer,
        signal_dbm,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::stream::StreamExt as _;
    use std::sync::{Arc, Mutex};

    /// Replays canned extraction output and records what it was asked to do.
    pub(crate) struct ScriptedTool {
        lines: Vec<String>,
        pub(crate) recorded: Mutex<Vec<(String, PathBuf)>>,
        pub(crate) extracted: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedTool {
        pub(crate) fn new(lines: &[&str]) -> Self {
            ScriptedTool {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                recorded: Mutex::new(Vec::new()),
                extracted: Mutex::new(Vec::new()),
            }
        }
    }

    impl CaptureTool for ScriptedTool {
        fn record<'a>(
            &'a self,
            adapter: &'a str,
            _duration: Duration,
            artifact: &'a Path,
        ) -> BoxFuture<'a, Result<(), ScanError>> {
            Box::pin(async move {
                std::fs::write(artifact, b"pcap")?;
                self.recorded
                    .lock()
                    .unwrap()
                    .push((adapter.to_string(), artifact.to_path_buf()));
                Ok(())
            })
        }

        fn extract<'a>(&'a self, artifact: &'a Path) -> BoxFuture<'a, Result<LineStream<'a>, ScanError>> {
            Box::pin(async move {
                self.extracted.lock().unwrap().push(artifact.to_path_buf());
                let lines = self.lines.clone().into_iter().map(Ok);
                Ok(stream::iter(lines).boxed())
            })
        }
    }

    /// A capture that exits at once without writing anything, as tshark does
    /// when the adapter is missing. Counts how often it was started.
    #[derive(Default)]
    pub(crate) struct GivesUpTool {
        pub(crate) records: Arc<Mutex<usize>>,
    }

    impl CaptureTool for GivesUpTool {
        fn record<'a>(
            &'a self,
            _adapter: &'a str,
            _duration: Duration,
            _artifact: &'a Path,
        ) -> BoxFuture<'a, Result<(), ScanError>> {
            Box::pin(async move {
                *self.records.lock().unwrap() += 1;
                tokio::task::yield_now().await;
                Ok(())
            })
        }

        fn extract<'a>(&'a self, _artifact: &'a Path) -> BoxFuture<'a, Result<LineStream<'a>, ScanError>> {
            Box::pin(async move { Ok(stream::empty::<std::io::Result<String>>().boxed()) })
        }
    }

    /// Writes the artifact, then never finishes recording.
    struct StuckTool;

    impl CaptureTool for StuckTool {
        fn record<'a>(
            &'a self,
            _adapter: &'a str,
            _duration: Duration,
            artifact: &'a Path,
        ) -> BoxFuture<'a, Result<(), ScanError>> {
            Box::pin(async move {
                std::fs::write(artifact, b"pcap")?;
                futures::future::pending().await
            })
        }

        fn extract<'a>(&'a self, _artifact: &'a Path) -> BoxFuture<'a, Result<LineStream<'a>, ScanError>> {
            Box::pin(async move { Ok(stream::empty::<std::io::Result<String>>().boxed()) })
        }
    }

    #[test]
    fn test_parse_single_reading() {
        let obs = parse_line("aa:bb:cc:11:22:33\t00:11:22:33:44:55\t-60")
            .unwrap()
            .unwrap();
        assert_eq!(obs.source, "aa:bb:cc:11:22:33".parse::<MacAddress>().unwrap());
        assert_eq!(obs.peer, Some("00:11:22:33:44:55".parse().unwrap()));
        assert_eq!(obs.signal_dbm, -60.0);
    }

    #[test]
    fn test_parse_dual_antenna_is_averaged() {
        let obs = parse_line("aa:bb:cc:11:22:33\t00:11:22:33:44:55\t-61,-65")
            .unwrap()
            .unwrap();
        assert_eq!(obs.signal_dbm, -63.0);
    }

    #[test]
    fn test_parse_skips_blank_and_malformed() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(
            parse_line("aa:bb:cc:11:22:33\t-60"),
            Err(MalformedLine::FieldCount(2))
        );
        assert_eq!(
            parse_line("Capturing on 'wlan0'  x"),
            Err(MalformedLine::FieldCount(4))
        );
        assert_eq!(
            parse_line("aabbcc112233\t00:11:22:33:44:55\t-60"),
            Err(MalformedLine::Address)
        );
        assert_eq!(
            parse_line("aa:bb:cc:11:22:33\t00:11:22:33:44:55\tstrong"),
            Err(MalformedLine::Signal)
        );
    }

    #[test]
    fn test_temporary_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let artifact = CaptureArtifact::temporary(dir.path());
            std::fs::write(artifact.path(), b"pcap").unwrap();
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_replay_artifact_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.pcapng");
        std::fs::write(&path, b"pcap").unwrap();
        drop(CaptureArtifact::replay(path.clone()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_live_capture_cleans_up_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ScriptedTool::new(&[
            "aa:bb:cc:11:22:33\t00:11:22:33:44:55\t-60",
            "",
            "garbage",
            "aa:bb:cc:11:22:34\t00:11:22:33:44:55\t-70,-72",
        ]);
        let session = CaptureSession::new(tool, dir.path().to_path_buf());
        let source = CaptureSource::Live {
            adapter: "wlan1".to_string(),
            duration: Duration::from_secs(1),
        };

        let mut seen = Vec::new();
        let stats = session.run(&source, |obs| seen.push(obs)).await.unwrap();

        assert_eq!(stats.lines, 4);
        assert_eq!(stats.observations, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(seen[1].signal_dbm, -71.0);

        let recorded = session.tool.recorded.lock().unwrap();
        assert_eq!(recorded[0].0, "wlan1");
        assert!(!recorded[0].1.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_replay_skips_recording() {
        let dir = tempfile::tempdir().unwrap();
        let replay = dir.path().join("old.pcapng");
        std::fs::write(&replay, b"pcap").unwrap();
        let session = CaptureSession::new(
            ScriptedTool::new(&["aa:bb:cc:11:22:33\t00:11:22:33:44:55\t-60"]),
            dir.path().to_path_buf(),
        );

        session
            .run(&CaptureSource::Replay(replay.clone()), |_| {})
            .await
            .unwrap();

        assert!(session.tool.recorded.lock().unwrap().is_empty());
        assert_eq!(*session.tool.extracted.lock().unwrap(), vec![replay.clone()]);
        assert!(replay.exists());
    }

    #[tokio::test]
    async fn test_no_valid_lines_is_no_signals_found() {
        let dir = tempfile::tempdir().unwrap();
        let session = CaptureSession::new(
            ScriptedTool::new(&["", "Capturing on wlan0", "nonsense here now"]),
            dir.path().to_path_buf(),
        );
        let source = CaptureSource::Live {
            adapter: "wlan0".to_string(),
            duration: Duration::from_secs(1),
        };

        let err = session.run(&source, |_| {}).await.unwrap_err();
        assert!(matches!(err, ScanError::NoSignalsFound { ref adapter } if adapter == "wlan0"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_capture_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let session = CaptureSession::new(StuckTool, dir.path().to_path_buf());
        let source = CaptureSource::Live {
            adapter: "wlan0".to_string(),
            duration: Duration::from_secs(60),
        };

        let result = tokio::time::timeout(Duration::from_millis(50), session.run(&source, |_| {})).await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_configured_tool() {
        let err = Tshark::locate(Some(Path::new("/nonexistent/tshark"))).unwrap_err();
        assert!(matches!(err, ScanError::ToolNotFound { .. }));
    }
}

use std::io::IsTerminal as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{ArgAction, Parser};
use log::{LevelFilter, error, info};

mod adapter;
mod aggregate;
mod capture;
mod config;
mod delivery;
mod device;
mod error;
mod filter;
mod manager;
mod messages;
mod mqtt;
mod progress;
mod report;
mod sink;
mod vendor;

use crate::adapter::AdapterChoice;
use crate::capture::{CaptureSession, CaptureSource, Tshark};
use crate::config::{AppConfig, EmptyScanPolicy, HttpConfig, SinkConfig};
use crate::error::ScanError;
use crate::report::{OutputMode, Reporter};
use crate::sink::Sink;
use crate::vendor::{DEFAULT_MOBILE_VENDORS, VendorClassifier, VendorDictionary};

/// Monitor Wi-Fi probe frames to count the number of people around you
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Adapter to capture on; prompts for one when omitted
    #[arg(short, long)]
    adapter: Option<String>,

    /// Seconds per capture window [default: 60]
    #[arg(short, long)]
    scantime: Option<u64>,

    /// More logging (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// What to print after each window
    #[arg(long, value_enum, default_value_t)]
    output: OutputMode,

    /// Append each window's devices to this file as JSON lines
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Read frames from this capture file instead of capturing live
    #[arg(long)]
    pcap: Option<PathBuf>,

    /// OUI dictionary [default: oui.txt]
    #[arg(short, long)]
    dictionary: Option<PathBuf>,

    /// File of mobile vendor names, one per line
    #[arg(short, long)]
    manufacturers: Option<PathBuf>,

    /// File of addresses to report on, one per line
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Only count mobile vendors
    #[arg(long)]
    mobile_only: bool,

    /// Only count devices stronger than the proximity threshold
    #[arg(short, long)]
    nearby: bool,

    /// Count devices, not people
    #[arg(long)]
    nocorrection: bool,

    /// Sort devices by signal strength
    #[arg(long)]
    sort: bool,

    /// HTTP endpoint to post results to
    #[arg(long)]
    endpoint: Option<String>,

    /// Run a single window, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(ScanError::Interrupted) = err.downcast_ref::<ScanError>() {
                info!("Interrupted, shutting down");
                return ExitCode::from(130);
            }
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.filter_level(level),
    };
    builder.init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    let dictionary = VendorDictionary::load(&config.dictionary_path())?;
    let classifier = VendorClassifier::new(dictionary, mobile_vendors(&config)?);
    let filter = config.presence_filter()?;
    let tool = Tshark::locate(config.capture.as_ref().and_then(|c| c.tshark_path.as_deref()))?;

    let replaying = cli.pcap.is_some();
    let source = match &cli.pcap {
        Some(path) => CaptureSource::Replay(path.clone()),
        None => {
            let choice = match config.capture.as_ref().and_then(|c| c.adapter.clone()) {
                Some(adapter) => AdapterChoice::Explicit(adapter),
                None => AdapterChoice::Interactive,
            };
            CaptureSource::Live {
                adapter: choice.resolve().await?,
                duration: config.scan_duration(),
            }
        }
    };
    // A replay file can't get any fuller by trying again.
    let empty_scan = if replaying {
        EmptyScanPolicy::Exit
    } else {
        config.empty_scan()
    };

    let serial = config
        .device
        .as_ref()
        .and_then(|d| d.serial.clone())
        .unwrap_or_else(device::cpu_serial);

    let sink: Box<dyn Sink> = match config.sink() {
        SinkConfig::Http(http) => Box::new(
            sink::HttpSink::new(http.url, config.delivery_timeout())
                .context("setting up HTTP delivery")?,
        ),
        SinkConfig::Mqtt(mqtt) => Box::new(mqtt::MqttSink::new(&mqtt, &serial)),
    };
    info!("Delivering to {} as {}", sink.describe(), serial);

    let mut targets = config.targets.clone().unwrap_or_default();
    if let Some(path) = &cli.targets {
        targets.extend(report::load_targets(path)?);
    }
    let reporter = Reporter::new(cli.output, cli.out.clone(), targets);

    let mut session = CaptureSession::new(tool, config.temp_dir());
    if cli.output == OutputMode::Human && std::io::stderr().is_terminal() {
        session = session.with_progress(Box::new(progress::ConsoleCountdown));
    }

    let mut manager = manager::Manager::new(session, source, classifier, filter, sink, serial)
        .with_delivery(config.delivery_timeout(), config.max_queued_records())
        .with_empty_scan(empty_scan)
        .with_reporter(reporter);

    // Dropping the loop on interrupt kills any running capture and removes
    // its temporary file.
    tokio::select! {
        result = manager.run_loop(cli.once || replaying) => result?,
        _ = tokio::signal::ctrl_c() => return Err(ScanError::Interrupted.into()),
    }
    Ok(())
}

fn mobile_vendors(config: &AppConfig) -> Result<Vec<String>, ScanError> {
    let vendors = config.vendors.as_ref();
    if let Some(path) = vendors.and_then(|v| v.mobile_file.as_ref()) {
        return vendor::load_mobile_vendors(path);
    }
    Ok(vendors
        .and_then(|v| v.mobile.clone())
        .unwrap_or_else(|| DEFAULT_MOBILE_VENDORS.iter().map(|v| v.to_string()).collect()))
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    let capture = config.capture.get_or_insert_with(Default::default);
    if let Some(adapter) = &cli.adapter {
        capture.adapter = Some(adapter.clone());
    }
    if let Some(seconds) = cli.scantime {
        capture.duration_seconds = Some(seconds);
    }

    let vendors = config.vendors.get_or_insert_with(Default::default);
    if let Some(dictionary) = &cli.dictionary {
        vendors.dictionary = Some(dictionary.clone());
    }
    if let Some(manufacturers) = &cli.manufacturers {
        vendors.mobile_file = Some(manufacturers.clone());
    }

    let filter = config.filter.get_or_insert_with(Default::default);
    if cli.mobile_only {
        filter.include_all_vendors = Some(false);
    }
    if cli.nearby {
        filter.proximity_only = Some(true);
    }
    if cli.nocorrection {
        filter.disable_correction = Some(true);
    }
    if cli.sort {
        filter.sort_by_signal = Some(true);
    }

    if let Some(url) = &cli.endpoint {
        config.sink = Some(SinkConfig::Http(HttpConfig { url: url.clone() }));
    }
}

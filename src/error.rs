use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Conditions that stop a capture cycle. Everything except `NoSignalsFound`
/// terminates the process; see `EmptyScanPolicy` for that one.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{tool} not found, install it with\n\n    {hint}\n")]
    ToolNotFound { tool: String, hint: String },

    #[error("couldn't load vendor dictionary {path:?}: {source}")]
    DictionaryLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vendor dictionary {path:?} contains no usable entries")]
    EmptyDictionary { path: PathBuf },

    #[error("found no signals, are you sure {adapter} supports monitor mode?")]
    NoSignalsFound { adapter: String },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("adapter selection failed: {0}")]
    AdapterSelection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a single record could not be handed to the sink. Always recovered:
/// the record stays queued for the next drain.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sink rejected record with status {status}")]
    Rejected { status: u16 },

    #[error("could not serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

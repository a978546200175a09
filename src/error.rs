//! Error types for the configuration and launch pipeline.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Path checks are the one hard failure point of the pipeline: a wrong
/// path cannot be worked around, so these abort the whole operation.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("failed to find {name} at {path:?}, please make sure the path is correct")]
    Missing { name: String, path: PathBuf },
    #[error("path given for {name} is a file, please select a folder: {path:?}")]
    ExpectedDirectory { name: String, path: PathBuf },
    #[error("path given for {name} is a folder, please select a file: {path:?}")]
    ExpectedFile { name: String, path: PathBuf },
    #[error("file given for {name} is not of the accepted types {accepted:?}: {path:?}")]
    UnacceptedExtension {
        name: String,
        path: PathBuf,
        accepted: &'static [&'static str],
    },
    #[error("could not read {name} at {path:?}")]
    Unreadable {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cross-field rule violations. Reported to the operator, the job is
/// never launched and no partial documents are written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{first} and {second} conflict with one another, please select only one")]
    Conflict {
        first: &'static str,
        second: &'static str,
    },
    #[error("scheduler {scheduler:?} has no warmup phase, remove the warmup ratio or pick another scheduler")]
    WarmupUnsupported { scheduler: String },
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Failures while reading or writing persisted configuration documents.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read config document")]
    Io(#[from] std::io::Error),
    #[error("malformed config document")]
    Toml(#[from] toml::de::Error),
    #[error("failed to serialize config document")]
    TomlSer(#[from] toml::ser::Error),
    #[error("malformed json config")]
    Json(#[from] serde_json::Error),
    #[error("json config is missing required key {0:?}")]
    MissingKey(&'static str),
}

/// Failures around the external trainer process itself.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("a training job is already running")]
    AlreadyRunning,
    #[error("failed to spawn the trainer process")]
    Spawn(#[source] std::io::Error),
    #[error("trainer process exited abnormally: {status}")]
    Failed { status: ExitStatus },
}

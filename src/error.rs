use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Reading the current settings document failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read settings file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Settings document is not a JSON object")]
    NotAnObject,
}

/// Writing the settings document failed.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// A legacy XML document could not be parsed.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read legacy document {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("XML parse error at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("Legacy document has no <{0}> root element")]
    MissingRoot(&'static str),
}

/// Importing a foreign settings file failed; the target was left untouched.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Import source {0} does not exist")]
    MissingSource(PathBuf),

    #[error(transparent)]
    Legacy(#[from] ParseError),

    #[error(transparent)]
    Current(#[from] LoadError),

    #[error("Failed to back up current settings before import: {0}")]
    Backup(#[source] SaveError),

    #[error("Failed to save imported settings: {0}")]
    Save(#[source] SaveError),
}

/// Spawning a browser process failed.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Browser target is empty")]
    EmptyTarget,

    #[error("Failed to launch {target}: {source}")]
    Spawn { target: String, source: io::Error },
}

/// The command line could not be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    #[error("Option '{0}' needs a value")]
    MissingValue(&'static str),

    #[error("Hotkey must be a single digit, got '{0}'")]
    InvalidHotkey(String),

    #[error("Nothing to open; pass a URL or file path")]
    MissingInput,
}

/// Top-level failure of a command-line run.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cli(#[from] CliError),

    #[error("Could not locate settings directory: {0}")]
    Paths(#[source] io::Error),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}

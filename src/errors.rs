//! Errors for meter recorder
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors that stop the recorder.
#[derive(Error, Debug)]
pub enum MeterRecorderError {
    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Could not initialize {process}: {reason}")]
    StartupFailure { process: String, reason: String },

    #[error("Process {process} exited unexpectedly ({status})")]
    ProcessExited { process: String, status: ExitStatus },

    #[error("Failed to open database {path}: {origin}")]
    DatabaseOpenError { path: PathBuf, origin: String },

    #[error("{message}: {origin}")]
    DatabaseConfigError { message: String, origin: String },

    #[error("Failed to create table {table}: {origin}")]
    TableCreationError { table: String, origin: String },

    #[error("Failed to create index {index}: {origin}")]
    IndexCreationError { index: String, origin: String },

    #[error("Persistence error: {0}")]
    PersistenceError(#[from] rusqlite::Error),
}

/// Errors for a single decoder line. These never stop the recorder.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("Malformed timestamp {value:?}: {source}")]
    MalformedTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

//! Error taxonomy for the activation daemon.
//!
//! Only [`StoreError`] and the configuration variants of [`ActivationError`]
//! are allowed to stop the process, and only at startup. Everything raised
//! inside a scheduler tick is absorbed into a state or a log record.

use std::io;
use std::path::PathBuf;

/// Convenient result alias used across the crate.
pub type ActivationResult<T> = Result<T, ActivationError>;

/// Top-level error returned by startup paths.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown activation channel '{0}' (expected oem, retail or volume)")]
    UnknownChannel(String),

    #[error("Daemon mode requires full administrative privileges")]
    NotPrivileged,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The key directory or artifact could not be created.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create storage directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create key artifact {path}: {source}")]
    CreateArtifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Hardware enumeration failed. Always transient from the scheduler's view.
#[derive(Debug, thiserror::Error)]
pub enum HardwareQueryError {
    #[error("Failed to enumerate network interfaces under {path}: {source}")]
    Interfaces {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read CPU descriptors from {path}: {source}")]
    CpuInfo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No hardware identifiers available")]
    Empty,

    #[error("Hardware enumeration is not supported on this platform")]
    Unsupported,
}

/// Transport failure while talking to the verification endpoint.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send request: {0}")]
    Send(#[source] io::Error),

    #[error("Failed to receive response: {0}")]
    Receive(#[source] io::Error),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, &'static str),
}

/// Error types for the config store, config state and notification delivery.
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The config file exists but its contents cannot be trusted.
#[derive(Debug, Error)]
pub enum ConfigCorruptError {
    /// The bytes are not valid UTF-8 JSON at all.
    #[error("config file is not readable JSON: {0}")]
    Unreadable(String),
    /// The bytes parse as JSON but do not describe a valid configuration.
    #[error("config file violates the schema: {0}")]
    Schema(String),
}

/// A config value that the loader would reject, so it may never enter the state.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{field} {reason}")]
pub struct InvalidValueError {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidValueError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the durable store (the on-disk `config.json`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config file I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Corrupt(#[from] ConfigCorruptError),
    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A mutator referenced a monitor target that is not in the current list.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("monitor target not found: {target}")]
pub struct NotFoundError {
    pub target: String,
}

/// Failure of a single per-destination delivery attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    /// The request never produced an HTTP response (DNS, TLS, connection reset...).
    #[error("transport error: {0}")]
    Transport(String),
    /// The API answered with a non-2xx status.
    #[error("API responded with status {0}")]
    Status(u16),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures resolving the application-support directory.
#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("{0} is not a valid platform")]
    UnknownPlatform(String),
    #[error("platform {0:?} is not supported")]
    UnsupportedPlatform(crate::paths::Platform),
    #[error("HOME environment variable not set")]
    MissingHome,
}

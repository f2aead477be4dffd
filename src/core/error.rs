/*!
 * Error types shared by the core modules
 *
 * Every failure resolves to one of these values; nothing in the core
 * aborts the host process.
 */

use std::path::PathBuf;

use thiserror::Error;

/// Malformed input rejected before it reaches storage or the kernel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("password must be 8-63 bytes, got {0}")]
    PasswordLength(usize),
    #[error("ESSID must be 1-32 bytes, got {0}")]
    EssidLength(usize),
    #[error("ESSID '{0}' already exists")]
    EssidExists(String),
    #[error("ESSID '{0}' does not exist")]
    EssidNotFound(String),
    #[error("invalid MAC address '{0}'")]
    MacAddress(String),
    #[error("invalid hex string: {0}")]
    Hex(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt shard {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("unsupported storage format {found} at {path:?} (expected {expected})")]
    Format {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}

/// A worker backend failed to produce results for one batch.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("remote worker error: {0}")]
    Remote(String),
    #[error("gpu error: {0}")]
    Gpu(String),
    #[error("backend returned {got} results for {expected} passwords")]
    LengthMismatch { expected: usize, got: usize },
    #[error("self-test failed: {0}")]
    SelfTest(String),
    #[error("backend panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unreadable capture: {0}")]
    Format(String),
    #[error("unsupported link type {0}")]
    LinkType(i32),
    #[error("no ESSID known for access point {0}")]
    EssidUnknown(String),
    #[error("handshake for {ap} / {station} is not complete")]
    Incomplete { ap: String, station: String },
}

/// Top-level error returned by the public operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("no functional compute backend available")]
    NoBackends,
    #[error("every backend failed a batch of {batch_len} passwords: {last_error}")]
    BackendsExhausted {
        batch_len: usize,
        last_error: String,
    },
    #[error("export failed: {0}")]
    Export(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

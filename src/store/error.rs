//! Error types for status store operations

use std::fmt;

/// Result type alias for status store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while looking up or mutating the status store
#[derive(Debug)]
pub enum StoreError {
    /// The host has no entry in the store
    UnknownHost(String),

    /// The test name was never interned
    UnknownTest(String),

    /// No record exists for the host/test/origin triple
    UnknownRecord { host: String, test: String },

    /// A rename would overwrite an existing host or test
    AlreadyExists(String),

    /// A report could not be applied
    Rejected(String),

    /// I/O error (file cache reads)
    IoError(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownHost(host) => write!(f, "unknown host: {}", host),
            StoreError::UnknownTest(test) => write!(f, "unknown test: {}", test),
            StoreError::UnknownRecord { host, test } => {
                write!(f, "no status for {}.{}", host, test)
            }
            StoreError::AlreadyExists(name) => write!(f, "{} already exists", name),
            StoreError::Rejected(reason) => write!(f, "report rejected: {}", reason),
            StoreError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

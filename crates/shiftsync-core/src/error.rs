//! Core error types for shiftsync-core.
//!
//! This module defines a comprehensive error hierarchy using thiserror
//! for better error handling and reporting across the library.

use std::path::PathBuf;
use thiserror::Error;

use crate::device::DeviceKind;

/// Core error type for shiftsync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Device communication errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Ledger (database) errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Per-event validation and parsing errors
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors talking to a biometric terminal.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Device unreachable or handshake rejected
    #[error("{kind} device at {addr} unreachable: {message}")]
    Unreachable {
        kind: DeviceKind,
        addr: String,
        message: String,
    },

    /// Device answered with something the adapter cannot interpret
    #[error("{kind} protocol error: {message}")]
    Protocol { kind: DeviceKind, message: String },

    /// Device I/O exceeded the configured timeout
    #[error("{kind} device at {addr} timed out")]
    Timeout { kind: DeviceKind, addr: String },

    /// Operation attempted without an established connection
    #[error("no active connection to {kind} device")]
    NotConnected { kind: DeviceKind },
}

/// Ledger-specific errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Failed to open the ledger database
    #[error("Failed to open ledger at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Ledger migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Ledger database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// The data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Errors affecting a single clock event or its classification.
#[derive(Error, Debug)]
pub enum EventError {
    /// A required field was missing on the raw event
    #[error("Clock event is missing required field '{field}'")]
    MissingField { field: &'static str },

    /// The event timestamp could not be parsed
    #[error("Malformed event timestamp: '{value}'")]
    MalformedTimestamp { value: String },

    /// A shift's stored time-of-day could not be parsed
    #[error("Invalid shift time-of-day: '{value}'")]
    InvalidTimeFormat { value: String },
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked {
                    LedgerError::Locked
                } else {
                    LedgerError::QueryFailed(err.to_string())
                }
            }
            _ => LedgerError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Ledger(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

pub mod config;
pub mod ledger;
pub mod migrations;

pub use config::{Config, DatabaseConfig, DeviceConfig, ExportConfig, SyncConfig};
pub use ledger::{AttendanceRecord, BatchOutcome, DeviceStatusRow, Ledger};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/shiftsync[-dev]/` based on SHIFTSYNC_ENV.
///
/// Set SHIFTSYNC_ENV=dev to use a development data directory.
///
/// # Errors
/// Returns an error if the config directory cannot be created.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("SHIFTSYNC_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("shiftsync-dev")
    } else {
        base_dir.join("shiftsync")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}

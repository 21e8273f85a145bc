pub mod check;
pub mod export;
pub mod run;
pub mod shift;
pub mod status;
pub mod sync;

use std::sync::Arc;

use shiftsync_core::device::{build_source, AttendanceSource};
use shiftsync_core::storage::{Config, Ledger};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Load config and open the ledger -- the common preamble.
pub fn open_ledger(config: &Config) -> Result<Arc<Ledger>, Box<dyn std::error::Error>> {
    Ok(Arc::new(Ledger::open_from_config(&config.database)?))
}

pub fn build_devices(config: &Config) -> Vec<Box<dyn AttendanceSource>> {
    config.devices.iter().map(build_source).collect()
}

use std::sync::atomic::Ordering;

use shiftsync_core::storage::Config;
use shiftsync_core::sync::SyncEngine;
use tracing::info;

use super::{build_devices, open_ledger, CommandResult};

/// Run the continuous synchronization service until interrupted.
pub fn run() -> CommandResult {
    let config = Config::load()?;
    let ledger = open_ledger(&config)?;
    let devices = build_devices(&config);
    if devices.is_empty() {
        return Err("no devices configured".into());
    }

    let mut engine = SyncEngine::new(ledger, devices, config.sync.clone());
    let cancel = engine.cancel_flag();
    ctrlc::set_handler(move || {
        info!("stop requested, finishing in-flight cycle");
        cancel.store(true, Ordering::SeqCst);
    })?;

    engine.run();
    Ok(())
}

use shiftsync_core::storage::Config;
use shiftsync_core::sync::SyncEngine;

use super::{build_devices, open_ledger, CommandResult};

/// Run exactly one sync cycle and print the per-device tally.
pub fn run() -> CommandResult {
    let config = Config::load()?;
    let ledger = open_ledger(&config)?;
    let devices = build_devices(&config);
    if devices.is_empty() {
        return Err("no devices configured".into());
    }

    let mut engine = SyncEngine::new(ledger, devices, config.sync.clone());
    let report = engine.run_cycle();

    for device in &report.devices {
        match &device.outcome {
            Ok(outcome) => println!(
                "{} {} - inserted: {}, duplicates: {}, errors: {}",
                device.kind, device.addr, outcome.inserted, outcome.duplicates, outcome.errors
            ),
            Err(e) => println!("{} {} - failed: {}", device.kind, device.addr, e),
        }
    }

    if !report.any_landed() {
        return Err("cycle landed no records".into());
    }
    Ok(())
}

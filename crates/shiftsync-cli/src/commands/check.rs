use shiftsync_core::storage::Config;

use super::{build_devices, open_ledger, CommandResult};

/// Probe every configured device and the ledger database.
pub fn run() -> CommandResult {
    let config = Config::load()?;

    match open_ledger(&config) {
        Ok(_) => println!("ok  ledger database"),
        Err(e) => println!("ERR ledger database: {e}"),
    }

    let mut failures = 0;
    for mut device in build_devices(&config) {
        let descriptor = device.descriptor().clone();
        match device.connect() {
            Ok(()) => {
                println!("ok  {} {} ({})", descriptor.kind, descriptor.addr, descriptor.role);
                device.disconnect();
            }
            Err(e) => {
                println!("ERR {} {}: {}", descriptor.kind, descriptor.addr, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} device(s) unreachable").into());
    }
    Ok(())
}

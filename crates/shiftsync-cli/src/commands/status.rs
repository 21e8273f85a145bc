use chrono::Local;
use shiftsync_core::storage::Config;

use super::{open_ledger, CommandResult};

/// Print device liveness and today's ledger summary.
pub fn run() -> CommandResult {
    let config = Config::load()?;
    let ledger = open_ledger(&config)?;

    let devices = ledger.device_rows()?;
    if devices.is_empty() {
        println!("no device has synced yet");
    } else {
        println!("{:<10} {:<16} {:<8} {:<20} status", "device", "address", "purpose", "last sync");
        for d in &devices {
            println!(
                "{:<10} {:<16} {:<8} {:<20} {}",
                d.kind,
                d.addr,
                d.purpose,
                d.last_sync.format("%Y-%m-%d %H:%M:%S"),
                if d.online { "ONLINE" } else { "OFFLINE" }
            );
        }
    }

    let today = Local::now().date_naive();
    let rows = ledger.records_for_day(today)?;
    let starts = rows.iter().filter(|r| r.is_shift_start).count();
    let ends = rows.iter().filter(|r| r.is_shift_end).count();
    println!(
        "\n{}: {} records, {} shift starts, {} shift ends",
        today,
        rows.len(),
        starts,
        ends
    );
    Ok(())
}

use chrono::NaiveTime;
use clap::Subcommand;
use shiftsync_core::storage::Config;

use super::{open_ledger, CommandResult};

#[derive(Subcommand)]
pub enum ShiftAction {
    /// Create a shift (end before start denotes an overnight shift)
    Add {
        name: String,
        /// Start time of day (HH:MM or HH:MM:SS)
        #[arg(value_parser = parse_time)]
        start: NaiveTime,
        /// End time of day (HH:MM or HH:MM:SS)
        #[arg(value_parser = parse_time)]
        end: NaiveTime,
    },
    /// Assign a user to a shift
    Assign { user_id: String, shift_id: i64 },
    /// List configured shifts
    List,
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    shiftsync_core::shift::parse_time_of_day(value).map_err(|e| e.to_string())
}

pub fn run(action: ShiftAction) -> CommandResult {
    let config = Config::load()?;
    let ledger = open_ledger(&config)?;

    match action {
        ShiftAction::Add { name, start, end } => {
            let id = ledger.add_shift(&name, start, end)?;
            let overnight = if end < start { " (overnight)" } else { "" };
            println!("created shift {id}: {name} {start}-{end}{overnight}");
        }
        ShiftAction::Assign { user_id, shift_id } => {
            ledger.assign_shift(&user_id, shift_id)?;
            println!("assigned user {user_id} to shift {shift_id}");
        }
        ShiftAction::List => {
            let shifts = ledger.shifts()?;
            if shifts.is_empty() {
                println!("no shifts configured");
            }
            for s in shifts {
                let overnight = if s.is_overnight() { " (overnight)" } else { "" };
                println!("{}: {} {}-{}{}", s.id, s.name, s.start_time, s.end_time, overnight);
            }
        }
    }
    Ok(())
}

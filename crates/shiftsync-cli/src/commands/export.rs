use chrono::{Local, NaiveDate, NaiveTime};
use clap::Args;
use shiftsync_core::export;
use shiftsync_core::storage::Config;

use super::{open_ledger, CommandResult};

#[derive(Args)]
pub struct ExportArgs {
    /// First day to include (YYYY-MM-DD); defaults to today
    #[arg(long, value_parser = parse_date)]
    from: Option<NaiveDate>,
    /// Last day to include (YYYY-MM-DD); defaults to --from
    #[arg(long, value_parser = parse_date)]
    to: Option<NaiveDate>,
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| e.to_string())
}

/// Export the selected date range to a timestamped CSV report.
pub fn run(args: ExportArgs) -> CommandResult {
    let config = Config::load()?;
    let ledger = open_ledger(&config)?;

    let from = args.from.unwrap_or_else(|| Local::now().date_naive());
    let to = args.to.unwrap_or(from);
    if to < from {
        return Err("--to must not be before --from".into());
    }

    let records = ledger.records_between(
        from.and_time(NaiveTime::MIN),
        to.and_hms_opt(23, 59, 59).unwrap_or_else(|| to.and_time(NaiveTime::MIN)),
    )?;
    if records.is_empty() {
        println!("no records between {from} and {to}");
        return Ok(());
    }

    let dir = config.export.resolved_dir()?;
    let path = export::export_to_dir(&dir, &records)?;
    println!("exported {} records to {}", records.len(), path.display());
    Ok(())
}

//! CSV export of attendance records.
//!
//! Produces the delimited clocking report consumed by payroll: one row per
//! ledger record, boundary flags rendered as Yes/No.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::storage::ledger::{AttendanceRecord, TIMESTAMP_FMT};

const HEADER: [&str; 10] = [
    "User ID",
    "Timestamp",
    "Employee Name",
    "Event Type",
    "Device Type",
    "Device IP",
    "Device Location",
    "Verification Mode",
    "Shift Start",
    "Shift End",
];

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

/// Quote a field when it contains a delimiter, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_row<W: Write>(writer: &mut W, fields: &[&str]) -> std::io::Result<()> {
    let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(writer, "{}", line.join(","))
}

/// Write the report for `records` to `writer`.
pub fn write_csv<W: Write>(writer: &mut W, records: &[AttendanceRecord]) -> std::io::Result<()> {
    write_row(writer, &HEADER)?;
    for record in records {
        let timestamp = record.timestamp.format(TIMESTAMP_FMT).to_string();
        write_row(
            writer,
            &[
                &record.user_id,
                &timestamp,
                &record.employee_name,
                record.direction.as_str(),
                record.device_kind.as_str(),
                &record.device_addr,
                &record.device_location,
                &record.verification_mode,
                yes_no(record.is_shift_start),
                yes_no(record.is_shift_end),
            ],
        )?;
    }
    Ok(())
}

/// Timestamped report filename, e.g. `attendance_20240501_083000.csv`.
pub fn default_filename() -> String {
    format!("attendance_{}.csv", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Write the report into `dir` under a timestamped name and return the
/// full path.
pub fn export_to_dir(dir: &Path, records: &[AttendanceRecord]) -> std::io::Result<PathBuf> {
    let path = dir.join(default_filename());
    let mut file = std::fs::File::create(&path)?;
    write_csv(&mut file, records)?;
    Ok(path)
}

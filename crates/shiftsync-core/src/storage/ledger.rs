//! SQLite attendance ledger.
//!
//! The ledger is the only component that mutates the attendance and device
//! tables. All writes for one pulled batch happen inside a single
//! transaction on a single connection; records are attempted independently,
//! so a batch commits its successes even when other rows fail or turn out
//! to be duplicates.
//!
//! Classification is folded into the same transaction: each punch is
//! inserted unflagged first, then promoted if it supersedes the current
//! flag holder. Doing the insert before the promote means a duplicate
//! punch short-circuits on the uniqueness constraint and can never strand
//! a demoted flag.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use tracing::warn;

use super::config::DatabaseConfig;
use super::migrations;
use crate::classifier::{self, Direction, FlagSide};
use crate::device::{ClockEvent, DeviceDescriptor, DeviceKind};
use crate::error::{EventError, LedgerError};
use crate::shift::{parse_time_of_day, Shift, User};

/// Ledger timestamp layout. Lexicographic order on this format matches
/// chronological order, which the flag queries rely on.
pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FMT: &str = "%Y-%m-%d";

/// One persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub user_id: String,
    pub employee_name: String,
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub status_note: Option<String>,
    pub shift_id: Option<i64>,
    pub shift_name: Option<String>,
    pub shift_day: NaiveDate,
    pub is_shift_start: bool,
    pub is_shift_end: bool,
    pub device_kind: DeviceKind,
    pub device_addr: String,
    pub device_location: String,
    pub verification_mode: String,
}

/// Per-batch write tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: u32,
    pub duplicates: u32,
    pub errors: u32,
    pub promoted_starts: u32,
    pub promoted_ends: u32,
}

impl BatchOutcome {
    /// Whether the cycle's window produced anything the ledger already
    /// knows or learned. A fully-duplicated overlap window still counts:
    /// it proves the device answered and the ledger is current.
    pub fn landed(&self) -> bool {
        self.inserted + self.duplicates > 0
    }
}

/// One row of the device liveness table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatusRow {
    pub kind: String,
    pub addr: String,
    pub location: String,
    pub purpose: String,
    pub last_sync: NaiveDateTime,
    pub online: bool,
}

enum Written {
    Inserted { flag: Option<FlagSide> },
    Duplicate,
}

/// SQLite-backed attendance ledger.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (and migrate) the ledger at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(|e| LedgerError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_connection(conn, Duration::from_millis(5_000))
    }

    /// Open using the configured path and busy timeout.
    pub fn open_from_config(cfg: &DatabaseConfig) -> crate::error::Result<Self> {
        let path = cfg.resolved_path()?;
        let conn = Connection::open(&path).map_err(|e| LedgerError::OpenFailed {
            path,
            source: e,
        })?;
        Self::from_connection(conn, Duration::from_millis(cfg.busy_timeout_ms))
    }

    /// Open an in-memory ledger (for tests).
    pub fn open_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(LedgerError::from)?;
        Self::from_connection(conn, Duration::from_millis(5_000))
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> crate::error::Result<Self> {
        conn.busy_timeout(busy_timeout).map_err(LedgerError::from)?;
        migrations::migrate(&conn).map_err(|e| LedgerError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Directory (users and shifts) ─────────────────────────────────

    /// Insert or update one directory user, preserving any existing shift
    /// assignment. Returns true if the user was new.
    pub fn upsert_user(&self, user_id: &str, name: &str) -> crate::error::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let known: Option<String> = conn
            .query_row(
                "SELECT name FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(none_on_no_rows)
            .map_err(LedgerError::from)?;

        match known {
            None => {
                conn.execute(
                    "INSERT INTO users (user_id, name) VALUES (?1, ?2)",
                    params![user_id, name],
                )
                .map_err(LedgerError::from)?;
                Ok(true)
            }
            Some(existing) if existing != name => {
                conn.execute(
                    "UPDATE users SET name = ?2 WHERE user_id = ?1",
                    params![user_id, name],
                )
                .map_err(LedgerError::from)?;
                Ok(false)
            }
            Some(_) => Ok(false),
        }
    }

    /// Directory sync from a device's user list. Returns the number of
    /// newly created users.
    pub fn sync_users(&self, users: &[(String, String)]) -> crate::error::Result<u32> {
        let mut created = 0;
        for (user_id, name) in users {
            if self.upsert_user(user_id, name)? {
                created += 1;
            }
        }
        Ok(created)
    }

    pub fn add_shift(
        &self,
        name: &str,
        start: NaiveTime,
        end: NaiveTime,
    ) -> crate::error::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO shifts (name, start_time, end_time) VALUES (?1, ?2, ?3)",
            params![
                name,
                start.format("%H:%M:%S").to_string(),
                end.format("%H:%M:%S").to_string()
            ],
        )
        .map_err(LedgerError::from)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn assign_shift(&self, user_id: &str, shift_id: i64) -> crate::error::Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE users SET shift_id = ?2 WHERE user_id = ?1",
                params![user_id, shift_id],
            )
            .map_err(LedgerError::from)?;
        if changed == 0 {
            return Err(LedgerError::QueryFailed(format!("no such user: {user_id}")).into());
        }
        Ok(())
    }

    pub fn shifts(&self) -> crate::error::Result<Vec<Shift>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, start_time, end_time FROM shifts ORDER BY id")
            .map_err(LedgerError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(LedgerError::from)?;

        let mut shifts = Vec::new();
        for row in rows {
            let (id, name, start, end) = row.map_err(LedgerError::from)?;
            shifts.push(Shift {
                id,
                name,
                start_time: parse_time_of_day(&start)?,
                end_time: parse_time_of_day(&end)?,
            });
        }
        Ok(shifts)
    }

    /// Look up a user and their assigned shift.
    pub fn user(&self, user_id: &str) -> crate::error::Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        user_query(&conn, user_id)
    }

    // ── Writing ──────────────────────────────────────────────────────

    /// Classify and persist one pulled batch inside a single transaction.
    ///
    /// Records are attempted independently: duplicates and per-record
    /// failures are counted and do not abort the batch. The transaction
    /// commits once after all records are attempted.
    pub fn write_batch(
        &self,
        descriptor: &DeviceDescriptor,
        events: &[ClockEvent],
    ) -> crate::error::Result<BatchOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(LedgerError::from)?;

        let mut outcome = BatchOutcome::default();
        for event in events {
            match insert_event(&tx, descriptor, event) {
                Ok(Written::Inserted { flag }) => {
                    outcome.inserted += 1;
                    match flag {
                        Some(FlagSide::Start) => outcome.promoted_starts += 1,
                        Some(FlagSide::End) => outcome.promoted_ends += 1,
                        None => {}
                    }
                }
                Ok(Written::Duplicate) => outcome.duplicates += 1,
                Err(e) => {
                    warn!(user_id = %event.user_id, error = %e, "skipping punch");
                    outcome.errors += 1;
                }
            }
        }

        tx.commit().map_err(LedgerError::from)?;
        Ok(outcome)
    }

    /// Upsert the device liveness row. Called once per cycle per device,
    /// independent of per-record outcomes.
    pub fn mark_device(
        &self,
        descriptor: &DeviceDescriptor,
        online: bool,
    ) -> crate::error::Result<()> {
        let now = Local::now().naive_local().format(TIMESTAMP_FMT).to_string();
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO devices (device_type, device_ip, device_location, purpose, last_sync, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(device_type, device_ip) DO UPDATE SET
                    device_location = excluded.device_location,
                    purpose = excluded.purpose,
                    last_sync = excluded.last_sync,
                    status = excluded.status",
                params![
                    descriptor.kind.as_str(),
                    descriptor.addr,
                    descriptor.location,
                    descriptor.role.as_str(),
                    now,
                    if online { "ONLINE" } else { "OFFLINE" }
                ],
            )
            .map_err(LedgerError::from)?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn device_rows(&self) -> crate::error::Result<Vec<DeviceStatusRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT device_type, device_ip, device_location, purpose, last_sync, status
                 FROM devices ORDER BY device_type, device_ip",
            )
            .map_err(LedgerError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeviceStatusRow {
                    kind: row.get(0)?,
                    addr: row.get(1)?,
                    location: row.get(2)?,
                    purpose: row.get(3)?,
                    last_sync: parse_timestamp_col(row.get::<_, String>(4)?, 4)?,
                    online: row.get::<_, String>(5)? == "ONLINE",
                })
            })
            .map_err(LedgerError::from)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::from(e).into())
    }

    /// Records whose punch timestamp falls in `[from, to]`, oldest first.
    pub fn records_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> crate::error::Result<Vec<AttendanceRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM attendance
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp"
            ))
            .map_err(LedgerError::from)?;
        let rows = stmt
            .query_map(
                params![
                    from.format(TIMESTAMP_FMT).to_string(),
                    to.format(TIMESTAMP_FMT).to_string()
                ],
                map_record,
            )
            .map_err(LedgerError::from)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::from(e).into())
    }

    /// Records attributed to a shift day, oldest first.
    pub fn records_for_day(&self, day: NaiveDate) -> crate::error::Result<Vec<AttendanceRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM attendance
                 WHERE shift_day = ?1 ORDER BY timestamp"
            ))
            .map_err(LedgerError::from)?;
        let rows = stmt
            .query_map(params![day.format(DATE_FMT).to_string()], map_record)
            .map_err(LedgerError::from)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::from(e).into())
    }

    /// The current flag holder for `(user, shift day)` on one side, if any.
    pub fn flag_holder(
        &self,
        user_id: &str,
        day: NaiveDate,
        side: FlagSide,
    ) -> crate::error::Result<Option<AttendanceRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM attendance
             WHERE user_id = ?1 AND shift_day = ?2 AND {} = 1",
            flag_column(side)
        );
        conn.query_row(
            &sql,
            params![user_id, day.format(DATE_FMT).to_string()],
            map_record,
        )
        .map(Some)
        .or_else(none_on_no_rows)
        .map_err(|e| LedgerError::from(e).into())
    }
}

const RECORD_COLUMNS: &str = "id, user_id, employee_name, timestamp, event_type, status_note, \
     shift_id, shift_name, shift_day, is_shift_start, is_shift_end, \
     device_type, device_ip, device_location, verification_mode";

fn flag_column(side: FlagSide) -> &'static str {
    match side {
        FlagSide::Start => "is_shift_start",
        FlagSide::End => "is_shift_end",
    }
}

fn none_on_no_rows<T>(err: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn conversion_err(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, message.into())
}

fn parse_timestamp_col(text: String, index: usize) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&text, TIMESTAMP_FMT)
        .map_err(|e| conversion_err(index, format!("bad timestamp '{text}': {e}")))
}

fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let direction_text: String = row.get(4)?;
    let kind_text: String = row.get(11)?;
    let day_text: String = row.get(8)?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        employee_name: row.get(2)?,
        timestamp: parse_timestamp_col(row.get::<_, String>(3)?, 3)?,
        direction: Direction::parse(&direction_text)
            .ok_or_else(|| conversion_err(4, format!("bad event type '{direction_text}'")))?,
        status_note: row.get(5)?,
        shift_id: row.get(6)?,
        shift_name: row.get(7)?,
        shift_day: NaiveDate::parse_from_str(&day_text, DATE_FMT)
            .map_err(|e| conversion_err(8, format!("bad shift day '{day_text}': {e}")))?,
        is_shift_start: row.get::<_, i64>(9)? != 0,
        is_shift_end: row.get::<_, i64>(10)? != 0,
        device_kind: DeviceKind::parse(&kind_text)
            .ok_or_else(|| conversion_err(11, format!("bad device kind '{kind_text}'")))?,
        device_addr: row.get(12)?,
        device_location: row.get(13)?,
        verification_mode: row.get(14)?,
    })
}

fn user_query(conn: &Connection, user_id: &str) -> crate::error::Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT u.user_id, u.name, u.shift_id, s.name, s.start_time, s.end_time
             FROM users u LEFT JOIN shifts s ON u.shift_id = s.id
             WHERE u.user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .map(Some)
        .or_else(none_on_no_rows)
        .map_err(LedgerError::from)?;

    let Some((user_id, name, shift_id, shift_name, start, end)) = row else {
        return Ok(None);
    };

    let shift = match (shift_id, shift_name, start, end) {
        (Some(id), Some(shift_name), Some(start), Some(end)) => Some(Shift {
            id,
            name: shift_name,
            start_time: parse_time_of_day(&start)?,
            end_time: parse_time_of_day(&end)?,
        }),
        _ => None,
    };

    Ok(Some(User {
        user_id,
        name,
        shift,
    }))
}

/// Classify one punch and write it, inside the batch transaction.
fn insert_event(
    tx: &Transaction<'_>,
    descriptor: &DeviceDescriptor,
    event: &ClockEvent,
) -> crate::error::Result<Written> {
    if event.user_id.is_empty() {
        return Err(EventError::MissingField { field: "user_id" }.into());
    }

    let user = user_query(tx, &event.user_id)?;
    let shift = user.as_ref().and_then(|u| u.shift.as_ref());
    let classification = classifier::classify(descriptor.role, event.timestamp, shift);

    let employee_name = user
        .as_ref()
        .map(|u| u.name.clone())
        .or_else(|| event.name.clone())
        .unwrap_or_else(|| format!("User_{}", event.user_id));
    let status_note = match classification.direction {
        Direction::In => "Check-in",
        Direction::Out => "Check-out",
    };
    let (shift_id, shift_name) = match shift {
        Some(s) => (Some(s.id), Some(s.name.clone())),
        None => (None, None),
    };

    // Insert unflagged first: a duplicate dies on the uniqueness
    // constraint before any flag is touched.
    let inserted = tx.execute(
        "INSERT INTO attendance (
            user_id, employee_name, timestamp, event_type, status_note,
            shift_id, shift_name, shift_day, is_shift_start, is_shift_end,
            device_type, device_ip, device_location, verification_mode
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10, ?11, ?12)",
        params![
            event.user_id,
            employee_name,
            event.timestamp.format(TIMESTAMP_FMT).to_string(),
            classification.direction.as_str(),
            status_note,
            shift_id,
            shift_name,
            classification.shift_day.format(DATE_FMT).to_string(),
            descriptor.kind.as_str(),
            descriptor.addr,
            descriptor.location,
            event.verification.as_str(),
        ],
    );
    match inserted {
        Err(e) if is_unique_violation(&e) => return Ok(Written::Duplicate),
        Err(e) => return Err(LedgerError::from(e).into()),
        Ok(_) => {}
    }
    let row_id = tx.last_insert_rowid();

    let mut flag = None;
    if classification.flag_eligible {
        let side = FlagSide::for_direction(classification.direction);
        let existing = current_flag(tx, &event.user_id, classification.shift_day, side)?;
        let take = existing
            .map_or(true, |(_, held)| side.supersedes(event.timestamp, held));
        if take {
            if let Some((old_id, _)) = existing {
                set_flag(tx, old_id, side, false)?;
            }
            set_flag(tx, row_id, side, true)?;
            flag = Some(side);
        }
    }

    Ok(Written::Inserted { flag })
}

fn current_flag(
    tx: &Transaction<'_>,
    user_id: &str,
    day: NaiveDate,
    side: FlagSide,
) -> crate::error::Result<Option<(i64, NaiveDateTime)>> {
    let sql = format!(
        "SELECT id, timestamp FROM attendance
         WHERE user_id = ?1 AND shift_day = ?2 AND {} = 1",
        flag_column(side)
    );
    tx.query_row(
        &sql,
        params![user_id, day.format(DATE_FMT).to_string()],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                parse_timestamp_col(row.get::<_, String>(1)?, 1)?,
            ))
        },
    )
    .map(Some)
    .or_else(none_on_no_rows)
    .map_err(|e| LedgerError::from(e).into())
}

fn set_flag(
    tx: &Transaction<'_>,
    row_id: i64,
    side: FlagSide,
    value: bool,
) -> crate::error::Result<()> {
    let sql = format!(
        "UPDATE attendance SET {} = ?2 WHERE id = ?1",
        flag_column(side)
    );
    tx.execute(&sql, params![row_id, value as i64])
        .map_err(LedgerError::from)?;
    Ok(())
}

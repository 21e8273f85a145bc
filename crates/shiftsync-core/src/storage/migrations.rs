//! Ledger schema migrations.
//!
//! Migrations are versioned and applied automatically when opening the
//! ledger. The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Apply all pending migrations to bring the ledger to the current schema.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: directory tables and the attendance ledger.
///
/// `unique_clock_record` is the dedup key -- the same punch re-delivered by
/// an overlapping pull window must land on this constraint, not as a second
/// row.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS shifts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            start_time  TEXT NOT NULL,
            end_time    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            user_id     TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            shift_id    INTEGER REFERENCES shifts(id)
        );

        CREATE TABLE IF NOT EXISTS attendance (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id           TEXT NOT NULL,
            employee_name     TEXT NOT NULL,
            timestamp         TEXT NOT NULL,
            event_type        TEXT NOT NULL,
            status_note       TEXT,
            shift_id          INTEGER,
            shift_name        TEXT,
            shift_day         TEXT NOT NULL,
            is_shift_start    INTEGER NOT NULL DEFAULT 0,
            is_shift_end      INTEGER NOT NULL DEFAULT 0,
            device_type       TEXT NOT NULL,
            device_ip         TEXT NOT NULL,
            device_location   TEXT NOT NULL,
            verification_mode TEXT NOT NULL,
            CONSTRAINT unique_clock_record UNIQUE (user_id, timestamp, device_type)
        );

        CREATE INDEX IF NOT EXISTS idx_attendance_timestamp ON attendance(timestamp);",
    )?;
    set_schema_version(conn, 1)
}

/// Migration v2: device liveness table and the flag-lookup index the
/// classifier hits once per punch.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS devices (
            device_type     TEXT NOT NULL,
            device_ip       TEXT NOT NULL,
            device_location TEXT NOT NULL,
            purpose         TEXT NOT NULL,
            last_sync       TEXT NOT NULL,
            status          TEXT NOT NULL,
            PRIMARY KEY (device_type, device_ip)
        );

        CREATE INDEX IF NOT EXISTS idx_attendance_shift_day
            ON attendance(user_id, shift_day);",
    )?;
    set_schema_version(conn, 2)
}

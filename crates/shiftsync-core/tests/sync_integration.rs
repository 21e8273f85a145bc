//! End-to-end sync cycles: mock terminals feeding the real ledger through
//! the sync engine.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use shiftsync_core::classifier::{Direction, FlagSide};
use shiftsync_core::device::{
    AttendanceSource, ClockEvent, DeviceDescriptor, DeviceKind, DeviceRole, VerificationMode,
};
use shiftsync_core::error::DeviceError;
use shiftsync_core::storage::{Ledger, SyncConfig};
use shiftsync_core::sync::SyncEngine;

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn punch(user: &str, time: &str) -> ClockEvent {
    ClockEvent {
        user_id: user.to_string(),
        name: None,
        timestamp: ts(time),
        verification: VerificationMode::Face,
        raw_status: None,
    }
}

/// Mock terminal serving a shared, mutable event list.
struct FixedDevice {
    descriptor: DeviceDescriptor,
    events: Arc<Mutex<Vec<ClockEvent>>>,
    users: Vec<(String, String)>,
    reachable: bool,
}

impl FixedDevice {
    fn entry(events: Arc<Mutex<Vec<ClockEvent>>>) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                kind: DeviceKind::HikVision,
                addr: "10.0.0.30".to_string(),
                location: "Main Entrance".to_string(),
                role: DeviceRole::Entry,
            },
            events,
            users: Vec::new(),
            reachable: true,
        }
    }

    fn exit(events: Arc<Mutex<Vec<ClockEvent>>>) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                kind: DeviceKind::ZkTeco,
                addr: "10.0.0.20".to_string(),
                location: "Exit Gate".to_string(),
                role: DeviceRole::Exit,
            },
            events,
            users: Vec::new(),
            reachable: true,
        }
    }
}

impl AttendanceSource for FixedDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        if self.reachable {
            Ok(())
        } else {
            Err(DeviceError::Unreachable {
                kind: self.descriptor.kind,
                addr: self.descriptor.addr.clone(),
                message: "cable pulled".to_string(),
            })
        }
    }

    fn pull(
        &mut self,
        _window_start: NaiveDateTime,
        _window_end: NaiveDateTime,
    ) -> Result<Vec<ClockEvent>, DeviceError> {
        Ok(self.events.lock().unwrap().clone())
    }

    fn users(&mut self) -> Result<Vec<(String, String)>, DeviceError> {
        Ok(self.users.clone())
    }

    fn disconnect(&mut self) {}
}

fn seeded_ledger() -> Arc<Ledger> {
    let ledger = Arc::new(Ledger::open_memory().unwrap());
    ledger.upsert_user("7", "Ada").unwrap();
    ledger.upsert_user("8", "Grace").unwrap();
    let morning = ledger
        .add_shift(
            "Morning",
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
        )
        .unwrap();
    ledger.assign_shift("7", morning).unwrap();
    ledger
}

fn quick_config() -> SyncConfig {
    SyncConfig {
        interval_secs: 0,
        error_threshold: 5,
        cooldown_secs: 0,
    }
}

#[test]
fn full_cycle_classifies_both_directions() {
    let ledger = seeded_ledger();
    let entry_events = Arc::new(Mutex::new(vec![
        punch("7", "2024-05-01T08:10:00"),
        punch("8", "2024-05-01T08:20:00"),
    ]));
    let exit_events = Arc::new(Mutex::new(vec![punch("7", "2024-05-01T17:00:00")]));

    let mut engine = SyncEngine::new(
        Arc::clone(&ledger),
        vec![
            Box::new(FixedDevice::entry(Arc::clone(&entry_events))),
            Box::new(FixedDevice::exit(Arc::clone(&exit_events))),
        ],
        quick_config(),
    );

    let report = engine.run_cycle();
    assert!(report.any_landed());
    assert_eq!(report.devices.len(), 2);

    let rows = ledger.records_for_day(day("2024-05-01")).unwrap();
    assert_eq!(rows.len(), 3);

    // Ada's arrival is the shift start, her departure the shift end.
    let start = ledger
        .flag_holder("7", day("2024-05-01"), FlagSide::Start)
        .unwrap()
        .unwrap();
    assert_eq!(start.timestamp, ts("2024-05-01T08:10:00"));
    assert_eq!(start.direction, Direction::In);

    let end = ledger
        .flag_holder("7", day("2024-05-01"), FlagSide::End)
        .unwrap()
        .unwrap();
    assert_eq!(end.timestamp, ts("2024-05-01T17:00:00"));
    assert_eq!(end.direction, Direction::Out);

    // Grace has no shift: direction from the device role, no flags.
    let grace: Vec<_> = rows.iter().filter(|r| r.user_id == "8").collect();
    assert_eq!(grace.len(), 1);
    assert!(!grace[0].is_shift_start && !grace[0].is_shift_end);

    // Both devices are online after the cycle.
    let devices = ledger.device_rows().unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.online));
}

#[test]
fn overlapping_windows_are_idempotent() {
    let ledger = seeded_ledger();
    let events = Arc::new(Mutex::new(vec![
        punch("7", "2024-05-01T08:10:00"),
        punch("8", "2024-05-01T08:20:00"),
    ]));
    let mut engine = SyncEngine::new(
        Arc::clone(&ledger),
        vec![Box::new(FixedDevice::entry(Arc::clone(&events)))],
        quick_config(),
    );

    engine.run_cycle();
    let second = engine.run_cycle();

    // Every re-delivered punch lands on the dedup key; the cycle still
    // counts as successful.
    assert!(second.any_landed());
    match &second.devices[0].outcome {
        Ok(outcome) => {
            assert_eq!(outcome.inserted, 0);
            assert_eq!(outcome.duplicates, 2);
        }
        Err(e) => panic!("cycle failed: {e}"),
    }

    let rows = ledger.records_for_day(day("2024-05-01")).unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn out_of_order_arrival_moves_the_start_flag() {
    let ledger = seeded_ledger();
    let events = Arc::new(Mutex::new(vec![punch("7", "2024-05-01T08:10:00")]));
    let mut engine = SyncEngine::new(
        Arc::clone(&ledger),
        vec![Box::new(FixedDevice::entry(Arc::clone(&events)))],
        quick_config(),
    );

    engine.run_cycle();

    // The next pull surfaces an earlier punch the device reported late.
    events
        .lock()
        .unwrap()
        .push(punch("7", "2024-05-01T08:05:00"));
    engine.run_cycle();

    let rows = ledger.records_for_day(day("2024-05-01")).unwrap();
    let flagged: Vec<_> = rows.iter().filter(|r| r.is_shift_start).collect();
    assert_eq!(flagged.len(), 1, "exactly one start flag after demotion");
    assert_eq!(flagged[0].timestamp, ts("2024-05-01T08:05:00"));
}

#[test]
fn directory_sync_names_users_before_attendance() {
    let ledger = Arc::new(Ledger::open_memory().unwrap());
    let events = Arc::new(Mutex::new(vec![punch("55", "2024-05-01T17:00:00")]));
    let mut clock = FixedDevice::exit(Arc::clone(&events));
    clock.users = vec![("55".to_string(), "Walk-in Joe".to_string())];

    let mut engine = SyncEngine::new(Arc::clone(&ledger), vec![Box::new(clock)], quick_config());
    engine.run_cycle();

    let rows = ledger.records_for_day(day("2024-05-01")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].employee_name, "Walk-in Joe");
}

#[test]
fn unreachable_device_fails_its_cycle_only() {
    let ledger = seeded_ledger();
    let good_events = Arc::new(Mutex::new(vec![punch("7", "2024-05-01T08:10:00")]));
    let mut dead = FixedDevice::exit(Arc::new(Mutex::new(Vec::new())));
    dead.reachable = false;

    let mut engine = SyncEngine::new(
        Arc::clone(&ledger),
        vec![
            Box::new(dead),
            Box::new(FixedDevice::entry(Arc::clone(&good_events))),
        ],
        quick_config(),
    );

    let report = engine.run_cycle();
    // The healthy device still lands its batch.
    assert!(report.any_landed());
    assert!(report.devices[0].outcome.is_err());
    assert!(report.devices[1].outcome.is_ok());

    let devices = ledger.device_rows().unwrap();
    let dead_row = devices.iter().find(|d| d.kind == "ZKTECO").unwrap();
    assert!(!dead_row.online);
    let live_row = devices.iter().find(|d| d.kind == "HIKVISION").unwrap();
    assert!(live_row.online);
}

//! Continuous synchronization engine.
//!
//! A single long-lived control loop drives adapter -> resolver ->
//! classifier -> writer for every configured device, forever. The pull
//! window is the start of the current local day through now -- deliberately
//! overlapping across cycles so a restart never loses punches; the ledger's
//! dedup key absorbs the re-delivery.
//!
//! Failure handling is counted, never fatal: a failed device cycle logs and
//! increments a consecutive-error counter, and hitting the threshold buys
//! an extended cooldown instead of a crash. Only the cancellation flag
//! stops the loop, observed at one-second grain so a stop request does not
//! wait out a full interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveTime};
use tracing::{error, info, warn};

use super::types::{CycleReport, DeviceCycle, EngineState, SyncStatus};
use crate::device::AttendanceSource;
use crate::error::CoreError;
use crate::storage::{BatchOutcome, Ledger, SyncConfig};

/// Grain at which sleeps observe the cancellation flag.
const CANCEL_POLL: Duration = Duration::from_secs(1);

pub struct SyncEngine {
    ledger: Arc<Ledger>,
    devices: Vec<Box<dyn AttendanceSource>>,
    config: SyncConfig,
    cancel: Arc<AtomicBool>,
    running: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        devices: Vec<Box<dyn AttendanceSource>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            ledger,
            devices,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    /// Shared stop flag. Setting it true stops the loop at the next
    /// one-second check; the in-flight cycle is allowed to finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().unwrap().clone()
    }

    /// Run cycles until cancelled.
    ///
    /// Idempotent: a second call while the loop is live returns
    /// immediately.
    pub fn run(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            devices = self.devices.len(),
            interval_secs = self.config.interval_secs,
            "starting continuous attendance synchronization"
        );

        let mut consecutive = 0u32;
        while !self.cancelled() {
            self.set_state(EngineState::Running);
            let report = self.run_cycle();

            {
                let mut status = self.status.lock().unwrap();
                status.last_cycle = Some(Local::now().naive_local());
                if report.any_landed() {
                    consecutive = 0;
                    status.last_success = Some(Local::now().naive_local());
                } else {
                    consecutive += 1;
                    warn!(consecutive, "sync cycle landed nothing");
                }
                status.consecutive_errors = consecutive;
            }
            if self.cancelled() {
                break;
            }

            if consecutive >= self.config.error_threshold {
                error!(
                    consecutive,
                    cooldown_secs = self.config.cooldown_secs,
                    "too many consecutive failures, backing off"
                );
                self.set_state(EngineState::Backoff);
                self.sleep_cancellable(Duration::from_secs(self.config.cooldown_secs));
                consecutive = 0;
                self.status.lock().unwrap().consecutive_errors = 0;
            } else {
                self.set_state(EngineState::Sleeping);
                self.sleep_cancellable(Duration::from_secs(self.config.interval_secs));
            }
        }

        self.set_state(EngineState::Stopped);
        self.running.store(false, Ordering::SeqCst);
        info!("attendance synchronization stopped");
    }

    /// One pass over all configured devices.
    pub fn run_cycle(&mut self) -> CycleReport {
        let started = std::time::Instant::now();
        let mut report = CycleReport::default();

        for device in &mut self.devices {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            let descriptor = device.descriptor().clone();
            let result = run_device_cycle(&self.ledger, device.as_mut());
            match &result {
                Ok(outcome) => info!(
                    device = %descriptor.kind,
                    addr = %descriptor.addr,
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates,
                    errors = outcome.errors,
                    promoted_starts = outcome.promoted_starts,
                    promoted_ends = outcome.promoted_ends,
                    "device cycle complete"
                ),
                Err(e) => error!(
                    device = %descriptor.kind,
                    addr = %descriptor.addr,
                    error = %e,
                    "device cycle failed"
                ),
            }
            report.devices.push(DeviceCycle {
                kind: descriptor.kind,
                addr: descriptor.addr,
                outcome: result.map_err(|e| e.to_string()),
            });
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "synchronization cycle finished"
        );
        report
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: EngineState) {
        self.status.lock().unwrap().state = state;
    }

    fn sleep_cancellable(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && !self.cancelled() {
            let step = remaining.min(CANCEL_POLL);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

/// Connect, sync the directory, pull the day window, write, disconnect.
///
/// The liveness row is updated exactly once whatever happens after
/// connect; a connect failure records the device as offline.
fn run_device_cycle(
    ledger: &Ledger,
    device: &mut dyn AttendanceSource,
) -> Result<BatchOutcome, CoreError> {
    if let Err(e) = device.connect() {
        if let Err(mark) = ledger.mark_device(device.descriptor(), false) {
            warn!(error = %mark, "failed to update device status");
        }
        return Err(e.into());
    }

    let result = pull_and_store(ledger, device);
    if let Err(e) = ledger.mark_device(device.descriptor(), result.is_ok()) {
        warn!(error = %e, "failed to update device status");
    }
    device.disconnect();
    result
}

fn pull_and_store(
    ledger: &Ledger,
    device: &mut dyn AttendanceSource,
) -> Result<BatchOutcome, CoreError> {
    let users = device.users()?;
    if !users.is_empty() {
        let created = ledger.sync_users(&users)?;
        if created > 0 {
            info!(created, "directory sync added users");
        }
    }

    let now = Local::now().naive_local();
    let window_start = now.date().and_time(NaiveTime::MIN);
    let events = device.pull(window_start, now)?;
    ledger.write_batch(device.descriptor(), &events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClockEvent, DeviceDescriptor, DeviceKind, DeviceRole, VerificationMode};
    use crate::error::DeviceError;
    use chrono::NaiveDateTime;
    use std::sync::atomic::AtomicU32;

    /// Scripted device: fails until `succeed_from` (1-based call number),
    /// then reports one punch per call; flips the shared cancel flag when
    /// `cancel_at` calls have happened.
    struct ScriptedSource {
        descriptor: DeviceDescriptor,
        calls: Arc<AtomicU32>,
        succeed_from: u32,
        cancel_at: u32,
        cancel: Arc<AtomicBool>,
    }

    impl AttendanceSource for ScriptedSource {
        fn descriptor(&self) -> &DeviceDescriptor {
            &self.descriptor
        }

        fn connect(&mut self) -> Result<(), DeviceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.cancel_at {
                self.cancel.store(true, Ordering::SeqCst);
            }
            if call < self.succeed_from {
                return Err(DeviceError::Unreachable {
                    kind: self.descriptor.kind,
                    addr: self.descriptor.addr.clone(),
                    message: "scripted failure".to_string(),
                });
            }
            Ok(())
        }

        fn pull(
            &mut self,
            _window_start: NaiveDateTime,
            _window_end: NaiveDateTime,
        ) -> Result<Vec<ClockEvent>, DeviceError> {
            let call = self.calls.load(Ordering::SeqCst);
            Ok(vec![ClockEvent {
                user_id: "7".to_string(),
                name: None,
                // Distinct timestamp per call so every success inserts.
                timestamp: NaiveDateTime::parse_from_str(
                    &format!("2024-05-01T08:00:{:02}", call % 60),
                    "%Y-%m-%dT%H:%M:%S",
                )
                .unwrap(),
                verification: VerificationMode::Face,
                raw_status: None,
            }])
        }

        fn disconnect(&mut self) {}
    }

    fn engine_with(succeed_from: u32, cancel_at: u32, threshold: u32) -> SyncEngine {
        let ledger = Arc::new(Ledger::open_memory().unwrap());
        let config = SyncConfig {
            interval_secs: 0,
            error_threshold: threshold,
            cooldown_secs: 0,
        };
        let mut engine = SyncEngine::new(ledger, Vec::new(), config);
        let source = ScriptedSource {
            descriptor: DeviceDescriptor {
                kind: DeviceKind::HikVision,
                addr: "10.0.0.1".to_string(),
                location: "Test".to_string(),
                role: DeviceRole::Entry,
            },
            calls: Arc::new(AtomicU32::new(0)),
            succeed_from,
            cancel_at,
            cancel: engine.cancel_flag(),
        };
        engine.devices.push(Box::new(source));
        engine
    }

    #[test]
    fn backoff_resets_the_consecutive_counter() {
        // Always failing; threshold 3; cancel on the 5th call.
        // Counter: 1, 2, 3 -> backoff resets -> 1, 2 (cancel).
        let mut engine = engine_with(u32::MAX, 5, 3);
        engine.run();

        let status = engine.status();
        assert_eq!(status.state, EngineState::Stopped);
        assert_eq!(status.consecutive_errors, 2);
        assert!(status.last_success.is_none());
        assert!(status.last_cycle.is_some());
    }

    #[test]
    fn a_successful_cycle_resets_the_counter() {
        // Fails twice, succeeds from the 3rd call, cancel on the 4th.
        // Counter: 1, 2, 0 (success), 0 (success again, cancel).
        let mut engine = engine_with(3, 4, 5);
        engine.run();

        let status = engine.status();
        assert_eq!(status.state, EngineState::Stopped);
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.last_success.is_some());
    }

    #[test]
    fn run_is_idempotent_while_live() {
        let mut engine = engine_with(1, 1, 5);
        // Simulate a live loop: the guard is held, so run() must bail out
        // without touching state.
        engine.running.store(true, Ordering::SeqCst);
        engine.run();
        assert_eq!(engine.status().state, EngineState::Idle);
    }

    #[test]
    fn stop_is_honored_within_the_sleep_grain() {
        // Successful device, long interval: the loop parks in the
        // cancellable sleep. Stop must take ~1 poll step, not the full
        // interval.
        let ledger = Arc::new(Ledger::open_memory().unwrap());
        let config = SyncConfig {
            interval_secs: 60,
            error_threshold: 5,
            cooldown_secs: 300,
        };
        let mut engine = SyncEngine::new(ledger, Vec::new(), config);
        let source = ScriptedSource {
            descriptor: DeviceDescriptor {
                kind: DeviceKind::HikVision,
                addr: "10.0.0.1".to_string(),
                location: "Test".to_string(),
                role: DeviceRole::Entry,
            },
            calls: Arc::new(AtomicU32::new(0)),
            succeed_from: 1,
            cancel_at: u32::MAX,
            cancel: engine.cancel_flag(),
        };
        engine.devices.push(Box::new(source));

        let cancel = engine.cancel_flag();
        let started = std::time::Instant::now();
        let handle = std::thread::spawn(move || {
            engine.run();
            engine
        });

        std::thread::sleep(Duration::from_millis(300));
        cancel.store(true, Ordering::SeqCst);
        let engine = handle.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(engine.status().state, EngineState::Stopped);
    }

    #[test]
    fn failed_device_is_marked_offline() {
        let mut engine = engine_with(u32::MAX, 1, 5);
        engine.run_cycle();

        let rows = engine.ledger.device_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].online);
    }
}

//! Status and reporting types for the sync engine.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::device::DeviceKind;
use crate::storage::BatchOutcome;

/// Scheduler state machine:
/// `Idle -> Running -> (Sleeping | Backoff) -> Running -> ... -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Sleeping,
    Backoff,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Sleeping => "sleeping",
            EngineState::Backoff => "backoff",
            EngineState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the engine's control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: EngineState,
    pub consecutive_errors: u32,
    pub last_success: Option<NaiveDateTime>,
    pub last_cycle: Option<NaiveDateTime>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            consecutive_errors: 0,
            last_success: None,
            last_cycle: None,
        }
    }
}

/// Outcome of one device's pass within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCycle {
    pub kind: DeviceKind,
    pub addr: String,
    pub outcome: Result<BatchOutcome, String>,
}

impl DeviceCycle {
    pub fn landed(&self) -> bool {
        matches!(&self.outcome, Ok(o) if o.landed())
    }
}

/// Outcome of one full cycle across all configured devices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub devices: Vec<DeviceCycle>,
}

impl CycleReport {
    /// A cycle succeeds when any device's batch landed something.
    pub fn any_landed(&self) -> bool {
        self.devices.iter().any(DeviceCycle::landed)
    }
}

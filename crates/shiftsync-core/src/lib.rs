//! # Shiftsync Core Library
//!
//! This library reconciles raw punch events from heterogeneous biometric
//! terminals into a single, shift-aware attendance ledger. The CLI binary
//! is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Shift calendar**: pure resolution of the calendar day a punch
//!   belongs to, including overnight shifts that straddle midnight
//! - **Classifier**: event direction plus first-arrival / last-departure
//!   flag decisions, with out-of-order demotion
//! - **Ledger**: SQLite storage with a deduplicating, partial-success
//!   batch writer and device liveness bookkeeping
//! - **Devices**: pull-based adapters for HikVision (ISAPI/HTTP) and
//!   ZKTeco (proprietary TCP) terminals behind one trait
//! - **Sync engine**: the continuous scheduler driving everything, with
//!   consecutive-failure backoff and cooperative cancellation
//!
//! ## Key Components
//!
//! - [`Shift`]: shift boundaries and shift-day resolution
//! - [`Ledger`]: the attendance ledger
//! - [`AttendanceSource`]: trait implemented by every terminal adapter
//! - [`SyncEngine`]: the continuous synchronization loop

pub mod classifier;
pub mod device;
pub mod error;
pub mod export;
pub mod shift;
pub mod storage;
pub mod sync;

pub use classifier::{Classification, Direction, FlagSide};
pub use device::{
    AttendanceSource, ClockEvent, DeviceDescriptor, DeviceKind, DeviceRole, VerificationMode,
};
pub use error::{ConfigError, CoreError, DeviceError, EventError, LedgerError, Result};
pub use shift::{Shift, User};
pub use storage::{AttendanceRecord, BatchOutcome, Config, DeviceConfig, Ledger};
pub use sync::{CycleReport, EngineState, SyncEngine, SyncStatus};

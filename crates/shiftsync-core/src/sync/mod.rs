//! Continuous synchronization: the scheduler driving adapters into the
//! ledger.

pub mod engine;
pub mod types;

pub use engine::SyncEngine;
pub use types::{CycleReport, DeviceCycle, EngineState, SyncStatus};

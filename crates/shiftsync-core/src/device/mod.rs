//! Device adapters for biometric terminals.
//!
//! Every terminal kind implements [`AttendanceSource`] -- a pull-based
//! capability set `{connect, pull, disconnect}` over which the sync engine
//! is polymorphic. Adapters decode device-specific payloads into
//! [`ClockEvent`]s and know nothing about shifts or the ledger.

pub mod hikvision;
pub mod zkteco;

pub use hikvision::HikVision;
pub use zkteco::{TcpTransport, ZkTeco, ZkTransport};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::storage::config::DeviceConfig;

/// Terminal hardware family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceKind {
    HikVision,
    ZkTeco,
}

impl DeviceKind {
    /// Ledger/text representation (`HIKVISION` / `ZKTECO`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::HikVision => "HIKVISION",
            DeviceKind::ZkTeco => "ZKTECO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HIKVISION" => Some(DeviceKind::HikVision),
            "ZKTECO" => Some(DeviceKind::ZkTeco),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a reader primarily reports arrivals or departures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceRole {
    Entry,
    Exit,
}

impl DeviceRole {
    /// Text used in the device status table's `purpose` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Entry => "ENTRY",
            DeviceRole::Exit => "EXIT",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the terminal verified the user's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMode {
    Face,
    Fingerprint,
    Card,
    Password,
    /// Anything the adapter could not map; kept verbatim.
    Other(String),
}

impl VerificationMode {
    pub fn as_str(&self) -> &str {
        match self {
            VerificationMode::Face => "Face",
            VerificationMode::Fingerprint => "Fingerprint",
            VerificationMode::Card => "Card",
            VerificationMode::Password => "Password",
            VerificationMode::Other(s) => s,
        }
    }

    /// Map a free-form mode string (HikVision reports these).
    pub fn from_label(label: &str) -> Self {
        match label {
            "Face" | "face" => VerificationMode::Face,
            "Fingerprint" | "fingerprint" | "FP" => VerificationMode::Fingerprint,
            "Card" | "card" => VerificationMode::Card,
            "Password" | "password" => VerificationMode::Password,
            other => VerificationMode::Other(other.to_string()),
        }
    }

    /// Map a ZKTeco punch verification code.
    pub fn from_zk_code(code: u8) -> Self {
        match code {
            0 => VerificationMode::Password,
            1 => VerificationMode::Fingerprint,
            2 => VerificationMode::Card,
            15 => VerificationMode::Face,
            other => VerificationMode::Other(format!("code {other}")),
        }
    }
}

/// One raw punch reported by a terminal.
///
/// Ephemeral: produced by an adapter's `pull`, consumed by one
/// classification pass, never stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEvent {
    pub user_id: String,
    /// Display name if the device knows it (HikVision does, ZKTeco doesn't).
    pub name: Option<String>,
    /// Local wall-clock time as reported by the device; no zone attached.
    pub timestamp: NaiveDateTime,
    pub verification: VerificationMode,
    /// Raw device status code, kept for diagnostics.
    pub raw_status: Option<i64>,
}

/// Static identity of a configured terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub kind: DeviceKind,
    pub addr: String,
    pub location: String,
    pub role: DeviceRole,
}

/// Pull-based source of clock events.
///
/// The engine calls `connect`, one or more `pull`s, then `disconnect`,
/// once per sync cycle. Pull order is not guaranteed by the hardware;
/// callers must not rely on it.
pub trait AttendanceSource: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn connect(&mut self) -> Result<(), DeviceError>;

    /// Punches within `[window_start, window_end]`.
    fn pull(
        &mut self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<Vec<ClockEvent>, DeviceError>;

    /// `(user_id, name)` pairs known to the terminal, for directory sync.
    /// Most devices don't own a user list; the default reports none.
    fn users(&mut self) -> Result<Vec<(String, String)>, DeviceError> {
        Ok(Vec::new())
    }

    fn disconnect(&mut self);
}

/// Build the adapter for a configured device.
pub fn build_source(cfg: &DeviceConfig) -> Box<dyn AttendanceSource> {
    match cfg.kind {
        DeviceKind::HikVision => Box::new(HikVision::from_config(cfg)),
        DeviceKind::ZkTeco => Box::new(ZkTeco::from_config(cfg)),
    }
}

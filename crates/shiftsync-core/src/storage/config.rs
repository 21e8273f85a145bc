//! TOML-based service configuration.
//!
//! Stores everything the sync service needs to come up:
//! - Ledger database location
//! - Sync interval and backoff tuning
//! - Configured terminals (address, credentials, role, location)
//! - Export output directory
//!
//! Configuration is stored at `~/.config/shiftsync/config.toml`. Field
//! defaults mirror the terminals' factory settings so a fresh install only
//! needs credentials filled in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::device::{DeviceDescriptor, DeviceKind, DeviceRole};
use crate::error::ConfigError;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            devices: default_devices(),
            export: ExportConfig::default(),
        }
    }
}

/// Ledger database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Ledger file path; defaults to `<data dir>/shiftsync.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.path {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir()?.join("shiftsync.db")),
        }
    }
}

/// Sync scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between sync cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failed cycles before entering the extended cooldown.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Cooldown length in seconds after the threshold is hit.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            error_threshold: default_error_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// One configured terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    pub ip: String,
    pub port: u16,
    pub role: DeviceRole,
    #[serde(default = "default_location")]
    pub location: String,
    /// HTTP basic-auth user (HikVision only).
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_device_timeout_secs")]
    pub timeout_secs: u64,
}

impl DeviceConfig {
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            kind: self.kind,
            addr: self.ip.clone(),
            location: self.location.clone(),
            role: self.role,
        }
    }
}

/// Export output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Report directory; defaults to `<data dir>/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl ExportConfig {
    pub fn resolved_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.log_dir {
            Some(p) => p.clone(),
            None => data_dir()?.join("logs"),
        };
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
        Ok(dir)
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_interval_secs() -> u64 {
    60
}
fn default_error_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    300
}
fn default_location() -> String {
    "Main Entrance".to_string()
}
fn default_device_timeout_secs() -> u64 {
    10
}

/// Factory-default terminal pair: an entry reader and an exit clock.
fn default_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig {
            kind: DeviceKind::HikVision,
            ip: "192.168.1.30".to_string(),
            port: 80,
            role: DeviceRole::Entry,
            location: "Main Entrance".to_string(),
            username: Some("admin".to_string()),
            password: None,
            timeout_secs: 10,
        },
        DeviceConfig {
            kind: DeviceKind::ZkTeco,
            ip: "192.168.1.20".to_string(),
            port: 4370,
            role: DeviceRole::Exit,
            location: "Exit Gate".to_string(),
            username: None,
            password: None,
            timeout_secs: 5,
        },
    ]
}

impl Config {
    /// Default config file path.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default path, falling back to defaults if no file
    /// exists yet.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

//! Learned parameter persistence
//!
//! The controller's tuned gains and balance point survive restarts as a
//! flat JSON record. The store is deliberately tolerant: a missing or
//! corrupt file falls back to factory defaults and is logged as a
//! recoverable condition, never a fatal error.

use crate::error::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Current schema version written by this build
pub const SCHEMA_VERSION: u32 = 2;

/// Flat persisted record of the tuned parameters
///
/// Unknown fields are ignored and missing fields fall back to defaults
/// so older stored records keep loading as the schema grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredParams {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_kp")]
    pub kp: f32,
    #[serde(default)]
    pub ki: f32,
    #[serde(default)]
    pub kd: f32,
    #[serde(default)]
    pub target_angle: f32,
}

fn default_schema_version() -> u32 {
    1
}

fn default_kp() -> f32 {
    5.0
}

impl StoredParams {
    /// Factory defaults used when no stored record exists
    pub fn factory() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            kp: 5.0,
            ki: 0.0,
            kd: 0.0,
            target_angle: 0.0,
        }
    }
}

impl Default for StoredParams {
    fn default() -> Self {
        Self::factory()
    }
}

/// Parameter store capability
///
/// The agent writes through on every accepted mutation and once more on
/// graceful shutdown. At-most-once-per-change semantics are all the core
/// requires.
pub trait ParamStore: Send {
    /// Load the last stored record, `None` when absent or unreadable
    fn load(&mut self) -> Result<Option<StoredParams>>;

    /// Persist the record
    fn save(&mut self, params: &StoredParams) -> Result<()>;
}

/// JSON file-backed store
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ParamStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<StoredParams>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<StoredParams>(&text) {
            Ok(params) => Ok(Some(params)),
            Err(e) => {
                // Corrupt store is recoverable: fall back to factory defaults
                warn!(
                    "Store: Corrupt parameter file {} ({}), using factory defaults",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    fn save(&mut self, params: &StoredParams) -> Result<()> {
        let text = serde_json::to_string_pretty(params)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-memory store for tests and throwaway runs
#[derive(Default)]
pub struct MemoryStore {
    record: Option<StoredParams>,
    /// Number of saves accepted, for write-through assertions
    pub save_count: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preloaded(params: StoredParams) -> Self {
        Self {
            record: Some(params),
            save_count: 0,
        }
    }

    pub fn last_saved(&self) -> Option<&StoredParams> {
        self.record.as_ref()
    }
}

impl ParamStore for MemoryStore {
    fn load(&mut self) -> Result<Option<StoredParams>> {
        Ok(self.record.clone())
    }

    fn save(&mut self, params: &StoredParams) -> Result<()> {
        self.record = Some(params.clone());
        self.save_count += 1;
        Ok(())
    }
}

//! State persistence layer.
//!
//! All supervisor records are small JSON documents behind the
//! [`StateStore`] trait: production uses [`FileStore`] (one file per
//! record under `.loopguard/`, written atomically), tests use
//! [`MemoryStore`]. A record that fails to parse is treated as missing
//! so a corrupted file self-heals to its default on the next load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{LoopguardError, Result};

/// Directory under the project root holding all persisted records.
pub const STATE_DIR: &str = ".loopguard";

/// The four persisted record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Circuit breaker counters and derived state.
    CircuitBreaker,
    /// Append-only circuit breaker transition history.
    CircuitBreakerHistory,
    /// Latest analysis result (overwritten each iteration).
    Analysis,
    /// Exit signal rolling windows.
    ExitSignals,
}

impl RecordKind {
    /// File name for this record.
    #[must_use]
    pub fn filename(&self) -> &'static str {
        match self {
            Self::CircuitBreaker => "circuit_breaker.json",
            Self::CircuitBreakerHistory => "circuit_breaker_history.json",
            Self::Analysis => "last_analysis.json",
            Self::ExitSignals => "exit_signals.json",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.filename())
    }
}

/// Abstraction over record persistence.
///
/// Injected into the analyzer, tracker, and breaker so unit tests never
/// touch the filesystem.
pub trait StateStore: Send + Sync {
    /// Load a record, returning `None` when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the record exists but cannot be read; a
    /// record that fails to parse is logged and reported as missing.
    fn load<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Option<T>>;

    /// Save a record, fully replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written durably.
    fn save<T: Serialize>(&self, kind: RecordKind, value: &T) -> Result<()>;
}

/// File-backed store writing one JSON document per record.
///
/// Writes go to a `.tmp` sibling first and are renamed into place so a
/// crash mid-write never leaves a half-written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    state_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `<project_dir>/.loopguard`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        Self {
            state_dir: project_dir.as_ref().join(STATE_DIR),
        }
    }

    /// Path of the file backing a record.
    #[must_use]
    pub fn record_path(&self, kind: RecordKind) -> PathBuf {
        self.state_dir.join(kind.filename())
    }

    /// Check whether a record file exists.
    #[must_use]
    pub fn exists(&self, kind: RecordKind) -> bool {
        self.record_path(kind).exists()
    }

    /// Delete a record file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    pub fn delete(&self, kind: RecordKind) -> Result<()> {
        let path = self.record_path(kind);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl StateStore for FileStore {
    fn load<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Option<T>> {
        let path = self.record_path(kind);

        // A missing file is the normal first-run case; any other read
        // failure (permissions, I/O) is not safe to paper over with
        // reinitialized state.
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LoopguardError::store(
                    kind.filename(),
                    format!("cannot read: {}", e),
                ))
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("{} is corrupted, reinitializing: {}", kind, e);
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    fn save<T: Serialize>(&self, kind: RecordKind, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;

        let temp_path = self.state_dir.join(format!("{}.tmp", kind.filename()));
        let final_path = self.record_path(kind);

        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&temp_path, json)
            .map_err(|e| LoopguardError::store(kind.filename(), e.to_string()))?;
        std::fs::rename(&temp_path, &final_path)
            .map_err(|e| LoopguardError::store(kind.filename(), e.to_string()))?;

        Ok(())
    }
}

/// In-memory store for unit tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKind, serde_json::Value>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Check whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inject a raw JSON value, bypassing typed save (for corruption tests).
    pub fn inject_raw(&self, kind: RecordKind, value: serde_json::Value) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(kind, value);
        }
    }
}

impl StateStore for MemoryStore {
    fn load<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Option<T>> {
        let records = self
            .records
            .lock()
            .map_err(|_| LoopguardError::store(kind.filename(), "poisoned lock"))?;

        let Some(value) = records.get(&kind) else {
            return Ok(None);
        };

        match serde_json::from_value(value.clone()) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                warn!("{} is corrupted, reinitializing: {}", kind, e);
                Ok(None)
            }
        }
    }

    fn save<T: Serialize>(&self, kind: RecordKind, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| LoopguardError::store(kind.filename(), "poisoned lock"))?;
        records.insert(kind, json);
        Ok(())
    }
}

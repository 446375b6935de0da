//! Per-user preference persistence.
//!
//! Small string-keyed JSON values with last-write-wins semantics: the last
//! selected conversation, muted rooms, notification choices. Reads fall back
//! to `None` on any missing key so callers can always start fresh.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

/// Key under which the session stores the last opened conversation.
pub const LAST_SELECTED_KEY: &str = "last_selected_conversation";

/// String-keyed JSON preference storage, last write wins.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPrefs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPrefs {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("preference store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("preference store poisoned"))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Preferences persisted as a single JSON document on disk.
///
/// The whole file is rewritten on every `set`; preference payloads are tiny
/// and infrequent, so no incremental format is warranted.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: Mutex<HashMap<String, Value>>,
}

impl FilePrefs {
    /// Opens the store at `path`, loading existing values when the file
    /// exists. A missing file starts empty; a corrupt file is an error.
    pub fn open(path: PathBuf) -> Result<Self> {
        let values = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading preferences from {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing preferences at {}", path.display()))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(values).context("encoding preferences")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing preferences to {}", self.path.display()))?;
        debug!(path = %self.path.display(), "preferences flushed");
        Ok(())
    }
}

impl PreferenceStore for FilePrefs {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("preference store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("preference store poisoned"))?;
        values.insert(key.to_string(), value);
        self.flush(&values)
    }
}

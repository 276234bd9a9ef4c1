use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::ClientResult;

// Default file name for the durable key/value store
pub const DEFAULT_STORE_FILE: &str = "repsight_store.json";

/// Durable key/value storage backed by a single JSON file.
///
/// Reads are served from memory. Every write rewrites the whole file through a
/// temporary sibling and a rename, so each key update lands atomically.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl LocalStore {
    // Open the store at the given path; unreadable contents start empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_entries(&path);
        debug!("Opened local store {} with {} keys", path.display(), entries.len());
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::open(dir.join(DEFAULT_STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed read. A value that does not match `T` is treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.lock().get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Ignoring unreadable value under key {}: {}", key, e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> ClientResult<()> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    pub fn remove(&self, key: &str) -> ClientResult<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> BTreeMap<String, Value> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read local store {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Local store {} is corrupt, starting empty: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

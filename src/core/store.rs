//! Persisted key-value store
//!
//! Values are JSON documents addressed by string keys. [`FileStore`] keeps one
//! `<key>.json` file per key in the data directory and replaces files
//! atomically; [`MemoryStore`] backs tests and `--ephemeral` sessions. A
//! missing key always means "use the default", never an error.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Well-known keys shared by the settings context and the history manager.
pub mod keys {
    pub const CREDENTIAL: &str = "openrouter_api_key";
    pub const SELECTED_MODEL: &str = "ai_coaches_selected_model";
    pub const USE_REASONING: &str = "ai_coaches_use_reasoning";
    pub const COACHES: &str = "ai_coaches_list";
    pub const SELECTED_COACH_IDS: &str = "ai_coaches_selected_coach_ids";
    pub const CHAT_HISTORY: &str = "ai_coaches_chat_history";
    pub const CURRENT_CHAT_ID: &str = "ai_coaches_current_chat_id";
}

const CHANGE_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum StoreError {
    InvalidKey(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        key: String,
        source: serde_json::Error,
    },
    Serialize {
        key: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidKey(key) => write!(f, "Invalid store key {key:?}"),
            StoreError::Io { path, source } => {
                write!(f, "Storage I/O failed at {}: {}", path.display(), source)
            }
            StoreError::Parse { key, source } => {
                write!(f, "Stored value for {key} is not valid JSON: {source}")
            }
            StoreError::Serialize { key, source } => {
                write!(f, "Could not serialize value for {key}: {source}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::InvalidKey(_) => None,
            StoreError::Io { source, .. } => Some(source),
            StoreError::Parse { source, .. } | StoreError::Serialize { source, .. } => {
                Some(source)
            }
        }
    }
}

/// A key changed. `value` is `None` when the key was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<Value>,
    /// Written by another process rather than through this handle.
    pub external: bool,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Read a typed value, falling back to `default` on absence or any failure.
pub fn load_or<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, default: T) -> T {
    match store.get(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(key, "ignoring stored value with unexpected shape: {err}");
                default
            }
        },
        Ok(None) => default,
        Err(err) => {
            warn!(key, "failed to read stored value: {err}");
            default
        }
    }
}

/// Write a typed value; failures are logged and the caller keeps its
/// in-memory state.
pub fn save<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    let result = serde_json::to_value(value)
        .map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })
        .and_then(|json| store.set(key, json));
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(key, "failed to persist value: {err}");
            false
        }
    }
}

pub fn discard(store: &dyn KeyValueStore, key: &str) {
    if let Err(err) = store.remove(key) {
        warn!(key, "failed to remove stored value: {err}");
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn notify(&self, key: &str, value: Option<Value>) {
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value,
            external: false,
        });
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.values).insert(key.to_string(), value.clone());
        self.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if lock(&self.values).remove(key).is_some() {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// JSON-file store rooted at a directory.
///
/// The last write wins across processes. Modification times seen through
/// this handle are remembered so [`FileStore::poll_external_changes`] can
/// report keys rewritten by another process.
pub struct FileStore {
    root: PathBuf,
    seen: Mutex<HashMap<String, Option<SystemTime>>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        debug!(path = %root.display(), "opened store");
        Ok(Self {
            root,
            seen: Mutex::new(HashMap::new()),
            changes,
        })
    }

    /// Platform data directory, e.g. `~/.local/share/coachroom` on Linux.
    pub fn default_root() -> Option<PathBuf> {
        ProjectDirs::from("org", "coachroom", "coachroom").map(|dirs| dirs.data_dir().to_path_buf())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }

    fn modified(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }

    fn mark_seen(&self, key: &str, path: &Path) {
        lock(&self.seen).insert(key.to_string(), Self::modified(path));
    }

    fn read_value(&self, key: &str, path: &Path) -> Result<Option<Value>, StoreError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                key: key.to_string(),
                source,
            })
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut temp_file = NamedTempFile::new_in(&self.root).map_err(io_err)?;
        temp_file.write_all(contents).map_err(io_err)?;
        temp_file.as_file_mut().sync_all().map_err(io_err)?;
        temp_file
            .persist(path)
            .map_err(|err| io_err(err.error))?;
        Ok(())
    }

    /// Re-check every key read or written through this handle and announce
    /// the ones whose file changed underneath it.
    pub fn poll_external_changes(&self) -> Vec<StoreChange> {
        let tracked: Vec<(String, Option<SystemTime>)> = lock(&self.seen)
            .iter()
            .map(|(key, time)| (key.clone(), *time))
            .collect();

        let mut changes = Vec::new();
        for (key, last_seen) in tracked {
            let Ok(path) = self.path_for(&key) else {
                continue;
            };
            let current = Self::modified(&path);
            if current == last_seen {
                continue;
            }
            let value = match self.read_value(&key, &path) {
                Ok(value) => value,
                Err(err) => {
                    warn!(key, "ignoring unreadable external change: {err}");
                    continue;
                }
            };
            lock(&self.seen).insert(key.clone(), current);
            let change = StoreChange {
                key,
                value,
                external: true,
            };
            let _ = self.changes.send(change.clone());
            changes.push(change);
        }
        changes
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        let value = self.read_value(key, &path)?;
        self.mark_seen(key, &path);
        Ok(value)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let contents = serde_json::to_vec(&value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.write_atomic(&path, &contents)?;
        self.mark_seen(key, &path);
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value: Some(value),
            external: false,
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.mark_seen(key, &path);
                return Ok(());
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        }
        self.mark_seen(key, &path);
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value: None,
            external: false,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

//! Session identifier persistence
//!
//! The session id is the only piece of state that survives a restart. It is
//! created once, saved under a fixed key and reused on the next start.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

/// Key the session id is stored under
pub const SESSION_KEY: &str = "metahuman_session_id";

/// Client-local key/value storage for the session id
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Generate a fresh session id: `session_<millis>_<7 random chars>`
pub fn generate_session_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().timestamp_millis(), &random[..7])
}

/// Load the persisted session id, creating and saving one if missing
pub fn get_or_create_session_id(storage: &dyn SessionStorage) -> String {
    if let Some(stored) = storage.get(SESSION_KEY) {
        if !stored.is_empty() {
            return stored;
        }
    }
    let id = generate_session_id();
    storage.set(SESSION_KEY, &id);
    debug!("Created new session id {}", id);
    id
}

/// In-memory storage, used in tests and when no file is configured
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }
}

/// Stores each key as a small text file inside a directory
///
/// Read and write failures are logged and otherwise ignored: a session id that
/// cannot be persisted is simply regenerated on the next start.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    dir: PathBuf,
}

impl FileSessionStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl SessionStorage for FileSessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Some(value.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Failed to create session dir {:?}: {}", self.dir, e);
            return;
        }
        if let Err(e) = std::fs::write(self.path_for(key), value) {
            warn!("Failed to persist {}: {}", key, e);
        }
    }
}

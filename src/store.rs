//! Local key-value persistence with cross-context change notification

use crate::errors::{NavError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

pub const BACKEND_CONFIG_KEY: &str = "service-nav-backend-config";
pub const SERVICES_KEY: &str = "service-nav-services";
pub const CATEGORIES_KEY: &str = "service-nav-categories";
pub const HEALTH_STATUS_KEY: &str = "service-nav-health-status";

const EVENT_CAPACITY: usize = 256;

/// A stored value changed in some context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed
    pub new_value: Option<String>,
    /// Context that made the change
    pub origin: String,
}

/// Raw durable medium behind a storage area
pub trait StorageBackend: Send + Sync + fmt::Debug {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    /// Returns whether the key existed
    fn delete(&self, key: &str) -> Result<bool>;
}

/// Volatile backend, for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(key).is_some())
    }
}

/// One JSON document per key inside a directory
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!("Opened file storage at {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid || key.starts_with('.') {
            return Err(NavError::Storage(format!("invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Medium shared by every context of one client
#[derive(Debug)]
struct StorageArea {
    backend: Box<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
    write_lock: Mutex<()>,
}

/// One context's handle on a storage area
#[derive(Clone)]
pub struct LocalStore {
    area: Arc<StorageArea>,
    context_id: String,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("context_id", &self.context_id)
            .field("backend", &self.area.backend)
            .finish()
    }
}

impl LocalStore {
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            area: Arc::new(StorageArea {
                backend,
                events,
                write_lock: Mutex::new(()),
            }),
            context_id: Uuid::new_v4().to_string(),
        }
    }

    /// File-backed store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_backend(Box::new(FileBackend::open(dir)?)))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::default()))
    }

    /// Open another context on the same storage area
    pub fn attach(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            context_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Read a value, falling back to `default` when it is missing or unreadable
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_opt(key).unwrap_or(default)
    }

    /// Read a value, `None` when it is missing or unreadable
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.area.backend.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read {} from local storage: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding corrupt local data under {}: {}", key, e);
                None
            }
        }
    }

    /// Persist a value and notify the other contexts when it changed
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;

        let _guard = self.area.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.area.backend.read(key).ok().flatten();
        if previous.as_deref() == Some(raw.as_str()) {
            return Ok(());
        }

        self.area.backend.write(key, &raw)?;
        debug!("Stored {} ({} bytes)", key, raw.len());
        self.publish(key, Some(raw));
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.area.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.area.backend.delete(key)? {
            debug!("Removed {}", key);
            self.publish(key, None);
        }
        Ok(())
    }

    /// Listen for changes made by other contexts
    pub fn subscribe(&self) -> StorageListener {
        StorageListener {
            receiver: self.area.events.subscribe(),
            context_id: self.context_id.clone(),
        }
    }

    fn publish(&self, key: &str, new_value: Option<String>) {
        // No listeners is not an error
        let _ = self.area.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin: self.context_id.clone(),
        });
    }
}

/// Stream of storage events from other contexts
pub struct StorageListener {
    receiver: broadcast::Receiver<StorageEvent>,
    context_id: String,
}

impl StorageListener {
    /// Next foreign event, `None` once the area is gone
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.origin == self.context_id => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Storage listener lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_get_returns_default_when_missing() {
        let store = LocalStore::in_memory();
        let value: Vec<String> = store.get(SERVICES_KEY, vec!["fallback".to_string()]);
        assert_eq!(value, vec!["fallback".to_string()]);
    }

    #[test]
    fn test_set_then_get() {
        let store = LocalStore::in_memory();
        store.set("numbers", &vec![1, 2, 3]).unwrap();

        let value: Vec<u32> = store.get("numbers", Vec::new());
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn test_corrupt_value_falls_back() {
        let backend = MemoryBackend::default();
        backend.write("numbers", "{not json").unwrap();
        let store = LocalStore::with_backend(Box::new(backend));

        let value: Vec<u32> = store.get("numbers", vec![9]);
        assert_eq!(value, vec![9]);
    }

    #[tokio::test]
    async fn test_other_context_sees_change() {
        let first = LocalStore::in_memory();
        let second = first.attach();
        let mut own = first.subscribe();
        let mut foreign = second.subscribe();

        first.set("key", &"value").unwrap();

        let event = timeout(Duration::from_secs(1), foreign.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "key");
        assert_eq!(event.new_value.as_deref(), Some("\"value\""));
        assert_eq!(event.origin, first.context_id());

        assert!(timeout(Duration::from_millis(50), own.recv()).await.is_err());
        assert_eq!(second.get("key", String::new()), "value");
    }

    #[tokio::test]
    async fn test_unchanged_value_is_silent() {
        let first = LocalStore::in_memory();
        let second = first.attach();
        first.set("key", &1).unwrap();

        let mut foreign = second.subscribe();
        first.set("key", &1).unwrap();
        assert!(timeout(Duration::from_millis(50), foreign.recv()).await.is_err());

        first.remove("key").unwrap();
        let event = timeout(Duration::from_secs(1), foreign.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.new_value, None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.set(CATEGORIES_KEY, &vec!["a", "b"]).unwrap();
        }

        let store = LocalStore::open(dir.path()).unwrap();
        let value: Vec<String> = store.get(CATEGORIES_KEY, Vec::new());
        assert_eq!(value, vec!["a".to_string(), "b".to_string()]);

        store.remove(CATEGORIES_KEY).unwrap();
        assert!(!dir.path().join(format!("{}.json", CATEGORIES_KEY)).exists());
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("numbers.json"), "][").unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        let value: Vec<u32> = store.get("numbers", vec![4]);
        assert_eq!(value, vec![4]);
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        let result = store.set("../escape", &1);
        assert!(matches!(result, Err(NavError::Storage(_))));
    }
}

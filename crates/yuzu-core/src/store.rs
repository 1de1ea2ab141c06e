//! JSON-file backed key-value store.
//!
//! A [`KeyValueStore`] holds a flat JSON object in memory and mirrors it to a
//! single file. Every save rewrites the whole file through a temporary file in
//! the same directory followed by a rename, so a crash mid-write never leaves a
//! truncated store behind.
//!
//! # Durability
//!
//! | Mode | When the file is written |
//! |------|--------------------------|
//! | autosave | after every successful `set`, `delete` or `clear` |
//! | manual | on [`save`](KeyValueStore::save), or on [`flush`](KeyValueStore::flush) when dirty |
//!
//! Reads always observe the in-memory map, so `get` after `set` sees the new
//! value even when persisting it failed.
//!
//! Saves are serialized: the file always holds the newest snapshot written,
//! and a mutation racing a save leaves the store dirty. Async callers use the
//! `*_async` variants, which do the file work on tokio's blocking pool.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = KeyValueStore::open("data/settings.json", true);
//! store.set("greeting", "hello")?;
//! assert_eq!(store.get::<String>("greeting").as_deref(), Some("hello"));
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::error::{StoreError, StoreResult};

/// Durable mapping from string keys to JSON values.
pub struct KeyValueStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    autosave: bool,
    entries: RwLock<Map<String, Value>>,
    dirty: AtomicBool,
    /// Held from snapshot to rename, so files land in snapshot order.
    save_lock: Mutex<()>,
}

impl StoreInner {
    fn load(&self, path: &Path) -> bool {
        let loaded = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Some(map),
                Ok(other) => {
                    warn!(path = %path.display(), kind = %json_kind(&other), "Store file is not a JSON object, starting empty");
                    None
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse store file, starting empty");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Store file not found, starting empty");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read store file, starting empty");
                None
            }
        };

        let ok = loaded.is_some();
        let _saving = self.save_lock.lock();
        let mut entries = self.entries.write();
        *entries = loaded.unwrap_or_default();
        self.dirty.store(false, Ordering::Release);
        if ok {
            debug!(path = %path.display(), entries = entries.len(), "Store loaded");
        }
        ok
    }

    fn save_to(&self, path: &Path) -> StoreResult<()> {
        let _saving = self.save_lock.lock();

        // Cleared before the snapshot: a mutation racing this save marks
        // the store dirty again.
        let own_file = path == self.path;
        let was_dirty = own_file && self.dirty.swap(false, Ordering::AcqRel);

        let result = self.write_snapshot(path);
        if result.is_err() && was_dirty {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn write_snapshot(&self, path: &Path) -> StoreResult<()> {
        let body = {
            let entries = self.entries.read();
            serde_json::to_vec_pretty(&*entries).map_err(|source| StoreError::Serialize {
                path: path.to_path_buf(),
                source,
            })?
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(path, e))?;
        tmp.write_all(&body).map_err(|e| StoreError::io(path, e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

        trace!(path = %path.display(), bytes = body.len(), "Store saved");
        Ok(())
    }

    /// Applies `change` to the map; marks the store dirty when it reports one.
    fn mutate(&self, change: impl FnOnce(&mut Map<String, Value>) -> bool) -> bool {
        let changed = change(&mut self.entries.write());
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        changed
    }
}

impl KeyValueStore {
    /// Opens the store at `path`, loading whatever it currently holds.
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>, autosave: bool) -> Self {
        let store = Self {
            inner: Arc::new(StoreInner {
                path: path.into(),
                autosave,
                entries: RwLock::new(Map::new()),
                dirty: AtomicBool::new(false),
                save_lock: Mutex::new(()),
            }),
        };
        store.inner.load(&store.inner.path);
        store
    }

    /// Backing file of this store.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether mutations are persisted immediately.
    pub fn autosave(&self) -> bool {
        self.inner.autosave
    }

    /// Whether the in-memory map has changes not yet written to the backing file.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Replaces the contents with the JSON object stored at `path`.
    ///
    /// Returns `false` and leaves the store empty when the file is missing,
    /// unreadable or not a JSON object.
    pub fn load(&self, path: &Path) -> bool {
        self.inner.load(path)
    }

    /// Writes the whole map to the backing file.
    pub fn save(&self) -> StoreResult<()> {
        self.inner.save_to(&self.inner.path)
    }

    /// Writes the whole map to `path`.
    ///
    /// Saving to the backing file clears the dirty flag; saving elsewhere does not.
    pub fn save_to(&self, path: &Path) -> StoreResult<()> {
        self.inner.save_to(path)
    }

    /// Saves only if there are unsaved changes. Returns whether a write happened.
    pub fn flush(&self) -> StoreResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// [`save`](Self::save) on the blocking thread pool.
    pub async fn save_async(&self) -> StoreResult<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.save_to(&inner.path))
            .await
            .map_err(|e| StoreError::io(self.path(), std::io::Error::other(e)))?
    }

    /// [`flush`](Self::flush) on the blocking thread pool.
    pub async fn flush_async(&self) -> StoreResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save_async().await?;
        Ok(true)
    }

    /// Typed read; `None` when absent or not convertible to `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        serde_json::from_value(value).ok()
    }

    /// Raw JSON read.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.entries.read().get(key).cloned()
    }

    /// Array stored under `key`, or an empty list when absent or not an array.
    pub fn get_array(&self, key: &str) -> Vec<Value> {
        match self.get_value(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Stores `value` under `key`.
    ///
    /// The in-memory map is updated even if the autosave that follows fails.
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> StoreResult<()> {
        self.insert(key.into(), value)?;
        self.autosave_now()
    }

    /// [`set`](Self::set), autosaving on the blocking thread pool.
    pub async fn set_async<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> StoreResult<()> {
        self.insert(key.into(), value)?;
        self.autosave_later().await
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed = self.inner.mutate(|entries| entries.remove(key).is_some());
        if removed {
            self.autosave_now()?;
        }
        Ok(removed)
    }

    /// [`delete`](Self::delete), autosaving on the blocking thread pool.
    pub async fn delete_async(&self, key: &str) -> StoreResult<bool> {
        let removed = self.inner.mutate(|entries| entries.remove(key).is_some());
        if removed {
            self.autosave_later().await?;
        }
        Ok(removed)
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Removes every entry.
    pub fn clear(&self) -> StoreResult<()> {
        self.inner.mutate(|entries| {
            entries.clear();
            true
        });
        self.autosave_now()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    fn insert<T: Serialize>(&self, key: String, value: T) -> StoreResult<()> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Serialize {
            path: self.inner.path.clone(),
            source,
        })?;
        self.inner.mutate(|entries| {
            entries.insert(key, value);
            true
        });
        Ok(())
    }

    fn autosave_now(&self) -> StoreResult<()> {
        if self.inner.autosave {
            self.save()?;
        }
        Ok(())
    }

    async fn autosave_later(&self) -> StoreResult<()> {
        if self.inner.autosave {
            self.save_async().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("path", &self.inner.path)
            .field("autosave", &self.inner.autosave)
            .field("entries", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

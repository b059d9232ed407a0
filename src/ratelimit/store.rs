//! Attempt record persistence.
//!
//! The limiter only needs per-key get/set plus two administrative
//! operations, so any backend that can offer those can sit behind
//! [`AttemptStore`]: an in-process map, a file on disk, or a shared cache.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::record::AttemptRecord;
use crate::error::StoreError;

/// Default prefix separating limiter state from other data in a shared store.
pub const DEFAULT_NAMESPACE: &str = "gatekeeper:";

/// Synchronous key-value persistence for attempt records.
///
/// Implementations must make single-key `get`/`set` safe to call from
/// multiple threads. Callers are responsible for serializing the
/// read-modify-write cycle on a key.
pub trait AttemptStore: Send + Sync {
    /// Load the record stored under `key`.
    fn get(&self, key: &str) -> Result<Option<AttemptRecord>, StoreError>;

    /// Store `record` under `key`. An empty record removes the key.
    fn set(&self, key: &str, record: &AttemptRecord) -> Result<(), StoreError>;

    /// Remove the record stored under `key`.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every record owned by this store.
    fn clear_all(&self) -> Result<(), StoreError>;

    /// Every stored record with its key.
    fn list_all(&self) -> Result<Vec<(String, AttemptRecord)>, StoreError>;
}

/// In-process attempt store.
///
/// State lives for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, AttemptRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AttemptStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<AttemptRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn set(&self, key: &str, record: &AttemptRecord) -> Result<(), StoreError> {
        if record.is_empty() {
            self.records.remove(key);
        } else {
            self.records.insert(key.to_string(), record.clone());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<(String, AttemptRecord)>, StoreError> {
        let mut entries: Vec<(String, AttemptRecord)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

/// Attempt store persisted as a JSON document on disk.
///
/// Records survive process restarts. Only keys under the store's namespace
/// are read or written; other top-level keys in the document are preserved
/// untouched, so the file can be shared with unrelated features.
///
/// Every write rewrites the whole document while holding the store lock, so
/// throughput is bounded by disk latency. It suits a single process guarding
/// a modest number of keys; async callers should run it on a blocking thread.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    namespace: String,
    document: Mutex<Map<String, Value>>,
}

impl FileStore {
    /// Open (or lazily create) the document at `path`.
    pub fn open<P: AsRef<Path>>(path: P, namespace: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let document = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            Map::new()
        };

        info!(
            path = %path.display(),
            namespace = namespace,
            entries = document.len(),
            "Opened attempt store"
        );

        Ok(Self {
            path,
            namespace: namespace.to_string(),
            document: Mutex::new(document),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Write the document atomically via a sibling temp file.
    fn flush(&self, document: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, serde_json::to_vec(document)?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "Flushed attempt store");
        Ok(())
    }

    /// Apply `mutate` and persist, rolling the in-memory copy back on failure.
    fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), StoreError>,
    {
        let mut document = self.document.lock();
        let previous = document.clone();

        mutate(&mut *document)?;
        if let Err(e) = self.flush(&*document) {
            *document = previous;
            return Err(e);
        }
        Ok(())
    }
}

impl AttemptStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<AttemptRecord>, StoreError> {
        let document = self.document.lock();
        match document.get(&self.namespaced(key)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, record: &AttemptRecord) -> Result<(), StoreError> {
        let key = self.namespaced(key);
        if record.is_empty() {
            return self.update(|document| {
                document.remove(&key);
                Ok(())
            });
        }

        let value = serde_json::to_value(record)?;
        self.update(|document| {
            document.insert(key, value);
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = self.namespaced(key);
        self.update(|document| {
            document.remove(&key);
            Ok(())
        })
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let namespace = self.namespace.clone();
        self.update(|document| {
            document.retain(|key, _| !key.starts_with(&namespace));
            Ok(())
        })
    }

    fn list_all(&self) -> Result<Vec<(String, AttemptRecord)>, StoreError> {
        let document = self.document.lock();
        let mut entries = Vec::new();
        for (key, value) in document.iter() {
            let Some(stripped) = key.strip_prefix(&self.namespace) else {
                continue;
            };
            match serde_json::from_value::<AttemptRecord>(value.clone()) {
                Ok(record) => entries.push((stripped.to_string(), record)),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed attempt record"),
            }
        }
        Ok(entries)
    }
}

//! Resource record persistence.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Last-known deployed state of one check, keyed by check name.
/// Mutated only by the reconciler after confirmed remote success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub remote_id: String,
    pub content_hash: String,
    #[serde(default)]
    pub monitor_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub slo_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Injected persistence capability with per-name exclusivity.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<ResourceRecord>, StateError>;
    async fn put(&self, name: &str, record: ResourceRecord) -> Result<(), StateError>;
    async fn delete(&self, name: &str) -> Result<(), StateError>;
    async fn names(&self) -> Result<Vec<String>, StateError>;

    /// Advisory per-name lock; held for the duration of one check's
    /// reconciliation.
    async fn lock(&self, name: &str) -> OwnedMutexGuard<()>;
}

/// Per-name lock registry shared by store implementations.
#[derive(Default)]
struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let entry = self.locks.entry(name.to_string()).or_default();
            Arc::clone(entry.value())
        };
        lock.lock_owned().await
    }
}

/// JSON-file backed store. The whole record map is rewritten atomically
/// (write to a temporary file, then rename) on every mutation.
pub struct FileStateStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ResourceRecord>>,
    locks: LockRegistry,
}

impl FileStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), "State store opened");

        Ok(Self {
            path,
            records: RwLock::new(records),
            locks: LockRegistry::default(),
        })
    }

    fn persist(&self, records: &BTreeMap<String, ResourceRecord>) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceRecord>, StateError> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put(&self, name: &str, record: ResourceRecord) -> Result<(), StateError> {
        let mut records = self.records.write().await;
        records.insert(name.to_string(), record);
        self.persist(&records)
    }

    async fn delete(&self, name: &str) -> Result<(), StateError> {
        let mut records = self.records.write().await;
        records.remove(name);
        self.persist(&records)
    }

    async fn names(&self) -> Result<Vec<String>, StateError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(name).await
    }
}

/// In-memory store for dry runs and tests.
#[derive(Default)]
pub struct MemoryStateStore {
    records: RwLock<BTreeMap<String, ResourceRecord>>,
    locks: LockRegistry,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceRecord>, StateError> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put(&self, name: &str, record: ResourceRecord) -> Result<(), StateError> {
        self.records
            .write()
            .await
            .insert(name.to_string(), record);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StateError> {
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>, StateError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str) -> ResourceRecord {
        ResourceRecord {
            remote_id: "chk-1".to_string(),
            content_hash: hash.to_string(),
            monitor_ids: BTreeMap::new(),
            slo_id: None,
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = FileStateStore::open(&path).unwrap();
            store.put("api", record("h1")).await.unwrap();
        }

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.get("api").await.unwrap(), Some(record("h1")));
        assert_eq!(store.names().await.unwrap(), vec!["api".to_string()]);

        store.delete("api").await.unwrap();
        assert_eq!(store.get("api").await.unwrap(), None);
    }

    #[tokio::test]
    async fn per_name_locks_are_exclusive() {
        let store = MemoryStateStore::new();

        let guard = store.lock("api").await;
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), store.lock("api"))
                .await
                .is_err(),
            "second lock on the same name should block"
        );
        // A different name is unaffected.
        let _other = store.lock("web").await;
        drop(guard);
        let _again = store.lock("api").await;
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TaskEngineError;

/// Persistence for terminal scan summaries. Implementations must be
/// idempotent on `store` and tolerate `delete`/`load` of a scan that was
/// never stored.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<Value>, TaskEngineError>;
    async fn store(&self, id: Uuid, scan: Value) -> Result<(), TaskEngineError>;
    async fn delete(&self, id: Uuid) -> Result<(), TaskEngineError>;
}

#[derive(Default)]
pub struct MemoryScanStore {
    scans: RwLock<HashMap<Uuid, Value>>,
}

impl MemoryScanStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn load(&self, id: Uuid) -> Result<Option<Value>, TaskEngineError> {
        Ok(self.scans.read().await.get(&id).cloned())
    }

    async fn store(&self, id: Uuid, scan: Value) -> Result<(), TaskEngineError> {
        self.scans.write().await.insert(id, scan);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), TaskEngineError> {
        self.scans.write().await.remove(&id);
        Ok(())
    }
}

/// One JSON file per scan id under `directory`, created on first use. File
/// operations are dispatched to the blocking thread pool so the event loop
/// is never blocked on disk I/O.
pub struct FileScanStore {
    directory: PathBuf,
}

impl FileScanStore {
    pub fn new(directory: PathBuf) -> Arc<Self> {
        Arc::new(FileScanStore { directory })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.directory.join(id.to_string())
    }
}

#[async_trait]
impl ScanStore for FileScanStore {
    async fn load(&self, id: Uuid) -> Result<Option<Value>, TaskEngineError> {
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| TaskEngineError::Store(std::io::Error::other(e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskEngineError::Store(e)),
        })
        .await
        .map_err(|e| TaskEngineError::Store(std::io::Error::other(e)))?
    }

    async fn store(&self, id: Uuid, scan: Value) -> Result<(), TaskEngineError> {
        let directory = self.directory.clone();
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            std::fs::create_dir_all(&directory)?;
            let pretty = serde_json::to_string_pretty(&scan)?;
            std::fs::write(&path, pretty)
        })
        .await
        .map_err(|e| TaskEngineError::Store(std::io::Error::other(e)))?
        .map_err(TaskEngineError::Store)
    }

    async fn delete(&self, id: Uuid) -> Result<(), TaskEngineError> {
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TaskEngineError::Store(e)),
        })
        .await
        .map_err(|e| TaskEngineError::Store(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryScanStore::new();
        let id = Uuid::new_v4();
        assert!(store.load(id).await.unwrap().is_none());
        store.store(id, json!({"id": id.to_string()})).await.unwrap();
        assert!(store.load(id).await.unwrap().is_some());
        store.delete(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScanStore::new(dir.path().join("scans"));
        let id = Uuid::new_v4();
        store
            .store(id, json!({"id": id.to_string(), "state": "FINISHED"}))
            .await
            .unwrap();
        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded["state"], "FINISHED");
        let raw = std::fs::read_to_string(dir.path().join("scans").join(id.to_string())).unwrap();
        assert!(raw.contains('\n'), "expected pretty-printed JSON");
        store.delete(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_delete_of_missing_scan_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScanStore::new(dir.path().join("scans"));
        store.delete(Uuid::new_v4()).await.unwrap();
    }
}

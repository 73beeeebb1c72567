//! Route persistence
//!
//! The store contract is upsert-by-id plus read-by-id. Upserts replace the whole
//! record and are atomic per id; concurrent writes to the same id are last-write-wins.
//!
//! - `MemoryRouteStore` - process-local map, used in tests and for dev runs
//! - `FileRouteStore` - same map, snapshotted to a JSON file after every upsert

use crate::domain::route::Route;
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Create or replace the record at `route.id`, returning the stored route
    async fn upsert(&self, route: Route) -> Result<Route, StoreError>;

    /// Fetch the full record, or `StoreError::NotFound`
    async fn get_by_id(&self, id: &str) -> Result<Route, StoreError>;
}

/// In-memory route store
#[derive(Default)]
pub struct MemoryRouteStore {
    routes: RwLock<FxHashMap<String, Route>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn upsert(&self, route: Route) -> Result<Route, StoreError> {
        self.routes.write().insert(route.id.clone(), route.clone());
        Ok(route)
    }

    async fn get_by_id(&self, id: &str) -> Result<Route, StoreError> {
        self.routes.read().get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// File-backed route store
///
/// Keeps every route in memory and rewrites the snapshot file on each upsert
/// (write to `<path>.tmp`, then rename). Writes are serialized, and the map is
/// only updated after the snapshot containing the new record is in place.
pub struct FileRouteStore {
    path: PathBuf,
    routes: RwLock<FxHashMap<String, Route>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileRouteStore {
    /// Open the store, loading an existing snapshot if the file is present
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let routes = if path.exists() {
            let content = std::fs::read(&path)?;
            let records: Vec<Route> = if content.is_empty() {
                Vec::new()
            } else {
                serde_json::from_slice(&content)?
            };
            records.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            FxHashMap::default()
        };

        info!(path = %path.display(), routes = %routes.len(), "route_store_opened");
        Ok(Self { path, routes: RwLock::new(routes), write_lock: tokio::sync::Mutex::new(()) })
    }

    /// Serialize the current records with `route` in place of any record at its id
    fn snapshot_with(&self, route: &Route) -> Result<Vec<u8>, StoreError> {
        let routes = self.routes.read();
        let mut records: Vec<&Route> =
            routes.values().filter(|r| r.id != route.id).chain(std::iter::once(route)).collect();
        // Stable file contents make diffs readable
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_json::to_vec_pretty(&records)?)
    }

    async fn persist(&self, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = %bytes.len(), "route_store_persisted");
        Ok(())
    }
}

#[async_trait]
impl RouteStore for FileRouteStore {
    async fn upsert(&self, route: Route) -> Result<Route, StoreError> {
        let _guard = self.write_lock.lock().await;

        // Readers only see a route once it is on disk
        let bytes = self.snapshot_with(&route)?;
        self.persist(bytes).await?;
        self.routes.write().insert(route.id.clone(), route.clone());
        Ok(route)
    }

    async fn get_by_id(&self, id: &str) -> Result<Route, StoreError> {
        self.routes.read().get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::route::Position;
    use std::sync::Arc;

    fn route(id: &str, distance: i64) -> Route {
        let mut r = Route::new(id, distance, vec![Position::new(1.0, 2.0), Position::new(3.0, 4.0)]);
        r.freight_price = 1.5;
        r
    }

    #[tokio::test]
    async fn test_memory_upsert_and_get() {
        let store = MemoryRouteStore::new();
        store.upsert(route("r1", 10)).await.unwrap();

        let loaded = store.get_by_id("r1").await.unwrap();
        assert_eq!(loaded, route("r1", 10));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_upsert_overwrites_wholesale() {
        let store = MemoryRouteStore::new();
        store.upsert(route("r1", 10)).await.unwrap();

        let replacement = Route::new("r1", 20, vec![]);
        store.upsert(replacement.clone()).await.unwrap();

        assert_eq!(store.get_by_id("r1").await.unwrap(), replacement);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_not_found() {
        let store = MemoryRouteStore::new();
        let err = store.get_by_id("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_memory_concurrent_distinct_ids() {
        let store = Arc::new(MemoryRouteStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(route(&format!("r{}", i), i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len(), 32);
        for i in 0..32 {
            assert_eq!(store.get_by_id(&format!("r{}", i)).await.unwrap().distance, i);
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("routes.json");

        {
            let store = FileRouteStore::open(&path).unwrap();
            store.upsert(route("r1", 10)).await.unwrap();
            store.upsert(route("r2", 20)).await.unwrap();
            store.upsert(route("r1", 30)).await.unwrap();
        }

        let reopened = FileRouteStore::open(&path).unwrap();
        assert_eq!(reopened.get_by_id("r1").await.unwrap().distance, 30);
        assert_eq!(reopened.get_by_id("r2").await.unwrap().distance, 20);
        assert!(matches!(reopened.get_by_id("r3").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_file_store_uses_persisted_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        let store = FileRouteStore::open(&path).unwrap();
        store.upsert(route("r1", 10)).await.unwrap();

        let content: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let record = &content[0];
        assert_eq!(record["_id"], "r1");
        assert_eq!(record["distance"], 10);
        assert_eq!(record["freight_price"], 1.5);
        assert_eq!(record["directions"][1]["lat"], 3.0);
    }

    #[test]
    fn test_file_store_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(FileRouteStore::open(&path), Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_failed_persist_never_exposes_route() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        let store = Arc::new(FileRouteStore::open(&path).unwrap());
        store.upsert(route("r0", 5)).await.unwrap();

        // A non-empty directory at the snapshot path makes the rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"x").unwrap();

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = tokio::spawn({
            let store = store.clone();
            let done = done.clone();
            async move {
                let mut seen = false;
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    seen |= store.get_by_id("r1").await.is_ok();
                    seen |= store.get_by_id("r0").await.unwrap().distance != 5;
                    tokio::task::yield_now().await;
                }
                seen
            }
        });

        let created = store.upsert(route("r1", 10)).await;
        let replaced = store.upsert(route("r0", 99)).await;
        done.store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(matches!(created, Err(StoreError::Backend(_))));
        assert!(matches!(replaced, Err(StoreError::Backend(_))));
        assert!(!reader.await.unwrap());
        assert!(matches!(store.get_by_id("r1").await, Err(StoreError::NotFound(_))));
        assert_eq!(store.get_by_id("r0").await.unwrap().distance, 5);
    }
}

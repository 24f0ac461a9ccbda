//! Object store abstraction and typed path grammar
//!
//! Workers, the dispatcher, and the synthesis coordinator share one durable,
//! path-addressable store. Ownership is statically partitioned by the path
//! scheme in [`paths`]: every writer owns exactly the keys it derives from
//! its work item, so no locking is needed and overwrites are the idempotency
//! mechanism rather than a hazard.
//!
//! Two implementations are provided: [`MemoryStore`] for tests and
//! single-process runs, and [`FsStore`] persisting under a root directory.

/// Typed outcome paths, date partitions, and the slugging function.
pub mod paths;

use crate::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A durable, path-addressable object store.
///
/// `put` overwrites unconditionally (last write wins). `list` returns every
/// key under a prefix, lexicographically ordered.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object at the key.
    async fn put(&self, key: &str, body: &str) -> Result<()>;

    /// Read an object, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// List all keys with the given prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether an object exists at the key.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Serialize a value as pretty JSON and store it.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize object for {key}: {e}")))?;
    store.put(key, &body).await
}

/// Fetch and deserialize an object, or `None` if the key does not exist.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(body) => serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| AppError::Store(format!("Malformed JSON object at {key}: {e}"))),
        None => Ok(None),
    }
}

// ============= In-Memory Store =============

/// In-memory object store backed by a sorted map.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: &str) -> Result<()> {
        self.objects
            .write()
            .insert(key.to_string(), body.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ============= Filesystem Store =============

/// Filesystem-backed object store. Keys map to files under a root directory,
/// with `/` as the separator.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        // Keys are internally generated, but reject traversal anyway.
        if key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(AppError::InvalidInput(format!("Invalid store key: {key}")));
        }
        Ok(self.root.join(key))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, key: &str, body: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Store(format!("Failed to create {parent:?}: {e}")))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| AppError::Store(format!("Failed to write {key}: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.resolve(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Store(format!("Failed to read {key}: {e}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::Store(format!("Failed to list {dir:?}: {e}"))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AppError::Store(format!("Failed to list {dir:?}: {e}")))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_put_get_overwrite() {
        let store = MemoryStore::new();
        store.put("a/b.json", "{\"v\":1}").await.unwrap();
        store.put("a/b.json", "{\"v\":2}").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a/b.json").await.unwrap().unwrap(), "{\"v\":2}");
        assert!(store.get("a/missing.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_list_by_prefix() {
        let store = MemoryStore::new();
        store.put("run/success/x.json", "1").await.unwrap();
        store.put("run/success/y.json", "2").await.unwrap();
        store.put("run/failed/z.json", "3").await.unwrap();

        let success = store.list("run/success/").await.unwrap();
        assert_eq!(success.len(), 2);
        assert_eq!(store.list("run/").await.unwrap().len(), 3);
        assert!(store.list("other/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store
            .put("research/2024/01/15/r1/success/p_a.json", "{}")
            .await
            .unwrap();
        store
            .put("research/2024/01/15/r1/failed/p_b.json", "{}")
            .await
            .unwrap();

        assert!(store
            .exists("research/2024/01/15/r1/success/p_a.json")
            .await
            .unwrap());

        let all = store.list("research/2024/01/15/r1/").await.unwrap();
        assert_eq!(all.len(), 2);
        let failed = store.list("research/2024/01/15/r1/failed/").await.unwrap();
        assert_eq!(failed, vec!["research/2024/01/15/r1/failed/p_b.json"]);
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.put("../escape.json", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        put_json(&store, "k.json", &serde_json::json!({"n": 7}))
            .await
            .unwrap();
        let back: Option<serde_json::Value> = get_json(&store, "k.json").await.unwrap();
        assert_eq!(back.unwrap()["n"], 7);

        let missing: Option<serde_json::Value> = get_json(&store, "nope.json").await.unwrap();
        assert!(missing.is_none());
    }
}

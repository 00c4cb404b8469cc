//! Storage backend traits. The real backends (a hosted key-value store and
//! a bytes-object store) are external collaborators; only the operations
//! this crate needs are specified here. In-memory implementations back tests
//! and single-node deployments.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    runtime::Runtime,
    sha256::Sha256,
};
use parking_lot::Mutex;

/// Fast storage for small values.
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;
    async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()>;
    /// Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// A stored object with the backend's bookkeeping attached.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Bytes,
    pub custom_metadata: BTreeMap<String, String>,
    pub size: u64,
    /// Unix milliseconds.
    pub uploaded_at: u64,
    pub etag: String,
}

/// Storage for large or binary values.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<StoredObject>>;
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        custom_metadata: BTreeMap<String, String>,
    ) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, Bytes>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[derive(Clone)]
pub struct InMemoryObjectStore<RT: Runtime> {
    runtime: RT,
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl<RT: Runtime> Debug for InMemoryObjectStore<RT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("objects", &self.objects.lock().len())
            .finish()
    }
}

impl<RT: Runtime> InMemoryObjectStore<RT> {
    pub fn new(runtime: RT) -> Self {
        Self {
            runtime,
            objects: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl<RT: Runtime> ObjectStore for InMemoryObjectStore<RT> {
    async fn get(&self, key: &str) -> anyhow::Result<Option<StoredObject>> {
        Ok(self.objects.lock().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        custom_metadata: BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let object = StoredObject {
            key: key.to_string(),
            etag: Sha256::hash(&bytes).as_hex(),
            size: bytes.len() as u64,
            uploaded_at: self.runtime.unix_timestamp().as_millis(),
            custom_metadata,
            bytes,
        };
        self.objects.lock().insert(key.to_string(), object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.objects.lock().remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use common::runtime::testing::TestRuntime;

    use super::*;

    #[tokio::test]
    async fn test_kv_round_trip_and_miss() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(kv.get("absent").await.unwrap(), None);
        kv.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_kv_prefix_listing() {
        let kv = InMemoryKeyValueStore::new();
        for key in ["code:a", "code:a:v:1.0.0", "code:b", "other"] {
            kv.put(key, Bytes::new()).await.unwrap();
        }
        assert_eq!(
            kv.list_keys("code:a").await.unwrap(),
            vec!["code:a".to_string(), "code:a:v:1.0.0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_object_store_attributes() {
        let store = InMemoryObjectStore::new(TestRuntime::new());
        store
            .put("code/f/latest", Bytes::from_static(b"wasm"), Default::default())
            .await
            .unwrap();
        let object = store.get("code/f/latest").await.unwrap().unwrap();
        assert_eq!(object.size, 4);
        assert_eq!(object.bytes, Bytes::from_static(b"wasm"));
        assert!(!object.etag.is_empty());
        assert!(object.uploaded_at > 0);
    }
}

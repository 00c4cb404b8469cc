use std::{
    collections::BTreeSet,
    sync::Arc,
};

use bytes::Bytes;
use common::types::{
    FunctionId,
    FunctionVersion,
};

use crate::{
    backends::{
        KeyValueStore,
        ObjectStore,
    },
    keys,
};

/// Versioned code, source-map and binary storage for registered functions.
///
/// Code text lives on the key-value surface; source maps and compiled
/// binaries live on the bytes-object surface. A read miss is `None`, never
/// an error; backend failures propagate.
#[derive(Clone, Debug)]
pub struct CodeStore {
    kv: Arc<dyn KeyValueStore>,
    objects: Arc<dyn ObjectStore>,
}

/// The outcome of a fallback-chain resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCode {
    pub code: Bytes,
    /// The version tag that actually matched.
    pub version: String,
    /// True iff the returned version differs from the requested one.
    pub fallback: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionPage {
    pub versions: Vec<String>,
    pub has_more: bool,
    pub cursor: Option<String>,
}

impl CodeStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { kv, objects }
    }

    pub async fn get(
        &self,
        fid: &FunctionId,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<Option<Bytes>> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        self.kv.get(&keys::kv_code_key(fid, &version)).await
    }

    pub async fn put(
        &self,
        fid: &FunctionId,
        code: Bytes,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<()> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        self.kv.put(&keys::kv_code_key(fid, &version), code).await
    }

    pub async fn delete(
        &self,
        fid: &FunctionId,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<()> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        self.kv.delete(&keys::kv_code_key(fid, &version)).await?;
        Ok(())
    }

    /// Remove every stored key for `fid`: the rolling latest, all fixed
    /// versions, and all associated source maps and binaries. Returns the
    /// number of code entries removed.
    pub async fn delete_all(&self, fid: &FunctionId) -> anyhow::Result<usize> {
        let mut deleted = 0;
        for key in self.code_keys(fid).await? {
            if self.kv.delete(&key).await? {
                deleted += 1;
            }
        }
        for key in self.objects.list(&keys::object_code_prefix(fid)).await? {
            self.objects.delete(&key).await?;
        }
        tracing::info!("Deleted {deleted} code entries for {fid}");
        Ok(deleted)
    }

    /// The set of version tags present, including `latest` when the rolling
    /// key exists.
    pub async fn list_versions(&self, fid: &FunctionId) -> anyhow::Result<BTreeSet<String>> {
        let mut versions = BTreeSet::new();
        for key in self.code_keys(fid).await? {
            if let Some(tag) = keys::parse_kv_code_key(fid, &key) {
                versions.insert(tag.to_string());
            }
        }
        Ok(versions)
    }

    /// Fixed versions in ascending semver order. `latest` is excluded.
    pub async fn list_versions_sorted(&self, fid: &FunctionId) -> anyhow::Result<Vec<String>> {
        let mut parsed: Vec<semver::Version> = self
            .list_versions(fid)
            .await?
            .into_iter()
            .filter_map(|tag| semver::Version::parse(&tag).ok())
            .collect();
        parsed.sort();
        Ok(parsed.into_iter().map(|v| v.to_string()).collect())
    }

    /// Page through the sorted fixed versions. The cursor is the last
    /// version tag of the previous page.
    pub async fn list_versions_paginated(
        &self,
        fid: &FunctionId,
        limit: usize,
        cursor: Option<&str>,
    ) -> anyhow::Result<VersionPage> {
        let sorted = self.list_versions_sorted(fid).await?;
        let start = match cursor {
            Some(cursor) => sorted.iter().position(|v| v == cursor).map_or(0, |i| i + 1),
            None => 0,
        };
        let versions: Vec<String> = sorted.iter().skip(start).take(limit).cloned().collect();
        let has_more = start + versions.len() < sorted.len();
        let cursor = if has_more {
            versions.last().cloned()
        } else {
            None
        };
        Ok(VersionPage {
            versions,
            has_more,
            cursor,
        })
    }

    /// Try `requested` first, then each version in `fallback_chain` in
    /// order. Returns the first hit, or `None` if every candidate misses.
    pub async fn get_with_fallback(
        &self,
        fid: &FunctionId,
        requested: &FunctionVersion,
        fallback_chain: &[FunctionVersion],
    ) -> anyhow::Result<Option<ResolvedCode>> {
        for (i, candidate) in std::iter::once(requested)
            .chain(fallback_chain.iter())
            .enumerate()
        {
            if let Some(code) = self.kv.get(&keys::kv_code_key(fid, candidate)).await? {
                let version = candidate.to_string();
                if i > 0 {
                    tracing::debug!("Resolved {fid}@{requested} via fallback to {version}");
                }
                return Ok(Some(ResolvedCode {
                    code,
                    fallback: candidate != requested,
                    version,
                }));
            }
        }
        Ok(None)
    }

    pub async fn put_source_map(
        &self,
        fid: &FunctionId,
        map: Bytes,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<()> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        self.objects
            .put(
                &keys::object_source_map_key(fid, &version),
                map,
                Default::default(),
            )
            .await
    }

    pub async fn get_source_map(
        &self,
        fid: &FunctionId,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<Option<Bytes>> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        let object = self
            .objects
            .get(&keys::object_source_map_key(fid, &version))
            .await?;
        Ok(object.map(|o| o.bytes))
    }

    /// Compiled artifacts (WASM) use the object-surface code keys.
    pub async fn put_binary(
        &self,
        fid: &FunctionId,
        binary: Bytes,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<()> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        self.objects
            .put(
                &keys::object_code_key(fid, &version),
                binary,
                Default::default(),
            )
            .await
    }

    pub async fn get_binary(
        &self,
        fid: &FunctionId,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<Option<Bytes>> {
        let version = version.cloned().unwrap_or(FunctionVersion::Latest);
        let object = self
            .objects
            .get(&keys::object_code_key(fid, &version))
            .await?;
        Ok(object.map(|o| o.bytes))
    }

    /// Fetch an arbitrary object-surface value by its full key. Used for
    /// source references that carry a raw object key.
    pub async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let object = self.objects.get(key).await?;
        Ok(object.map(|o| o.bytes))
    }

    pub async fn exists(
        &self,
        fid: &FunctionId,
        version: Option<&FunctionVersion>,
    ) -> anyhow::Result<bool> {
        Ok(self.get(fid, version).await?.is_some())
    }

    /// All key-value code keys for `fid`, filtered against sibling ids that
    /// share the textual prefix.
    async fn code_keys(&self, fid: &FunctionId) -> anyhow::Result<Vec<String>> {
        let keys = self.kv.list_keys(&keys::kv_code_prefix(fid)).await?;
        Ok(keys
            .into_iter()
            .filter(|k| keys::parse_kv_code_key(fid, k).is_some())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use common::{
        runtime::testing::TestRuntime,
        types::{
            FunctionId,
            FunctionVersion,
        },
    };
    use pretty_assertions::assert_eq;

    use super::CodeStore;
    use crate::backends::{
        InMemoryKeyValueStore,
        InMemoryObjectStore,
    };

    fn store() -> CodeStore {
        CodeStore::new(
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(InMemoryObjectStore::new(TestRuntime::new())),
        )
    }

    fn fid(s: &str) -> FunctionId {
        FunctionId::parse(s).unwrap()
    }

    fn v(s: &str) -> FunctionVersion {
        FunctionVersion::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_get_put_round_trip() {
        let store = store();
        let id = fid("hello");
        assert_eq!(store.get(&id, None).await.unwrap(), None);
        store
            .put(&id, Bytes::from_static(b"export default 1"), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(&id, None).await.unwrap(),
            Some(Bytes::from_static(b"export default 1"))
        );
        // Versioned writes do not touch latest.
        store
            .put(&id, Bytes::from_static(b"export default 2"), Some(&v("1.0.0")))
            .await
            .unwrap();
        assert_eq!(
            store.get(&id, Some(&v("1.0.0"))).await.unwrap(),
            Some(Bytes::from_static(b"export default 2"))
        );
        assert_eq!(
            store.get(&id, None).await.unwrap(),
            Some(Bytes::from_static(b"export default 1"))
        );
    }

    #[tokio::test]
    async fn test_list_versions_sorted_is_semver_order() {
        let store = store();
        let id = fid("hello");
        for tag in ["1.10.0", "1.2.0", "0.9.1"] {
            store
                .put(&id, Bytes::from_static(b"x"), Some(&v(tag)))
                .await
                .unwrap();
        }
        store.put(&id, Bytes::from_static(b"x"), None).await.unwrap();
        let all = store.list_versions(&id).await.unwrap();
        assert!(all.contains("latest"));
        assert_eq!(all.len(), 4);
        // Lexicographic order would put 1.10.0 before 1.2.0.
        assert_eq!(
            store.list_versions_sorted(&id).await.unwrap(),
            vec!["0.9.1", "1.2.0", "1.10.0"]
        );
    }

    #[tokio::test]
    async fn test_pagination_walks_the_sorted_list() {
        let store = store();
        let id = fid("hello");
        for tag in ["1.0.0", "2.0.0", "3.0.0", "4.0.0", "5.0.0"] {
            store
                .put(&id, Bytes::from_static(b"x"), Some(&v(tag)))
                .await
                .unwrap();
        }
        let first = store.list_versions_paginated(&id, 2, None).await.unwrap();
        assert_eq!(first.versions, vec!["1.0.0", "2.0.0"]);
        assert!(first.has_more);
        let second = store
            .list_versions_paginated(&id, 2, first.cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.versions, vec!["3.0.0", "4.0.0"]);
        assert!(second.has_more);
        let last = store
            .list_versions_paginated(&id, 2, second.cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(last.versions, vec!["5.0.0"]);
        assert!(!last.has_more);
        assert_eq!(last.cursor, None);
    }

    #[tokio::test]
    async fn test_fallback_chain_returns_first_match() {
        let store = store();
        let id = fid("hello");
        store
            .put(&id, Bytes::from_static(b"v2"), Some(&v("2.0.0")))
            .await
            .unwrap();
        store
            .put(&id, Bytes::from_static(b"v1"), Some(&v("1.0.0")))
            .await
            .unwrap();
        // Requested version exists: no fallback.
        let hit = store
            .get_with_fallback(&id, &v("2.0.0"), &[v("1.0.0")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.version, "2.0.0");
        assert!(!hit.fallback);
        // Requested misses, chain walks in order.
        let fallback = store
            .get_with_fallback(&id, &v("3.0.0"), &[v("2.5.0"), v("2.0.0"), v("1.0.0")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.version, "2.0.0");
        assert!(fallback.fallback);
        assert_eq!(fallback.code, Bytes::from_static(b"v2"));
        // Everything misses.
        assert_eq!(
            store
                .get_with_fallback(&id, &v("9.0.0"), &[v("8.0.0")])
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_delete_all_removes_versions_and_source_maps() {
        let store = store();
        let id = fid("hello");
        let sibling = fid("hello2");
        store.put(&id, Bytes::from_static(b"x"), None).await.unwrap();
        store
            .put(&id, Bytes::from_static(b"x"), Some(&v("1.0.0")))
            .await
            .unwrap();
        store
            .put_source_map(&id, Bytes::from_static(b"{}"), Some(&v("1.0.0")))
            .await
            .unwrap();
        store
            .put(&sibling, Bytes::from_static(b"y"), None)
            .await
            .unwrap();

        let deleted = store.delete_all(&id).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.list_versions(&id).await.unwrap().is_empty());
        assert_eq!(
            store.get_source_map(&id, Some(&v("1.0.0"))).await.unwrap(),
            None
        );
        // The sibling sharing the textual prefix is untouched.
        assert!(store.exists(&sibling, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_binary_surface_round_trip() {
        let store = store();
        let id = fid("wasm-fn");
        store
            .put_binary(&id, Bytes::from_static(b"\0asm"), Some(&v("1.0.0")))
            .await
            .unwrap();
        assert_eq!(
            store.get_binary(&id, Some(&v("1.0.0"))).await.unwrap(),
            Some(Bytes::from_static(b"\0asm"))
        );
        assert_eq!(store.get_binary(&id, None).await.unwrap(), None);
    }
}

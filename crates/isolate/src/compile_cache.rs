//! Content-hash-keyed LRU over compiled artifacts.
//!
//! Keys are `(language, sha256(code), sandbox fingerprint)`, never function
//! ids: two functions sharing identical source share one artifact, and a
//! redeploy with changed source misses naturally.

use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use common::{
    runtime::{
        Runtime,
        UnixTimestamp,
    },
    sha256::Sha256Digest,
    types::{
        FunctionId,
        Language,
    },
};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::executor::CompiledArtifact;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub language: Language,
    pub content_hash: Sha256Digest,
    /// Hash of the sandbox policy fields that change compilation output.
    pub sandbox_fingerprint: u64,
}

struct CacheEntry {
    artifact: Arc<CompiledArtifact>,
    inserted_at: UnixTimestamp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded LRU with an optional per-entry TTL. All counters live under the
/// same lock as the entries so stats are consistent snapshots.
pub struct CompileCache<RT: Runtime> {
    runtime: RT,
    ttl: Option<Duration>,
    state: Mutex<CacheState>,
}

impl<RT: Runtime> CompileCache<RT> {
    pub fn new(runtime: RT, max_size: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).expect("max(1) is nonzero");
        Self {
            runtime,
            ttl,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Look up an artifact, refreshing its LRU position. An entry older
    /// than the TTL reads as a miss and is dropped so the caller's
    /// recompile replaces it.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompiledArtifact>> {
        let now = self.runtime.unix_timestamp();
        let mut state = self.state.lock();
        let inserted_at = match state.entries.get(key) {
            Some(entry) => entry.inserted_at,
            None => {
                state.misses += 1;
                crate::metrics::log_cache_miss();
                return None;
            },
        };
        if let Some(ttl) = self.ttl {
            let age = now.checked_sub(inserted_at).unwrap_or(Duration::ZERO);
            if age > ttl {
                state.entries.pop(key);
                state.misses += 1;
                crate::metrics::log_cache_miss();
                return None;
            }
        }
        state.hits += 1;
        crate::metrics::log_cache_hit();
        let artifact = state
            .entries
            .get(key)
            .expect("entry checked above")
            .artifact
            .clone();
        Some(artifact)
    }

    /// Insert an artifact, evicting the least-recently-used entry when
    /// full. The size cap holds even under concurrent inserts: the push and
    /// the eviction accounting share one critical section.
    pub fn insert(&self, key: CacheKey, artifact: Arc<CompiledArtifact>) {
        let entry = CacheEntry {
            artifact,
            inserted_at: self.runtime.unix_timestamp(),
        };
        let mut state = self.state.lock();
        if let Some((evicted_key, _)) = state.entries.push(key.clone(), entry) {
            if evicted_key != key {
                state.evictions += 1;
                crate::metrics::log_cache_eviction();
                tracing::debug!("Compile cache evicted an artifact for {:?}", evicted_key.language);
            }
        }
    }

    /// Drop every cached artifact and reset the eviction counter.
    ///
    /// A content-hash-keyed cache cannot enumerate one function's entries
    /// without an id-to-hash index, so invalidation is wholesale. Observable
    /// consequence: `stats().evictions == 0` right after an invalidate.
    pub fn invalidate(&self, fid: &FunctionId) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.evictions = 0;
        tracing::info!("Compile cache cleared by invalidation of {fid}");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

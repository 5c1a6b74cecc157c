//! Process-wide memo of "count matching rows" results.
//!
//! Keys are the SHA-256 of the canonical JSON of a filter set. Concurrent
//! misses on the same key share one computation; failures are handed to every
//! waiter of that computation and are not stored. A computation that started
//! before the last invalidation is never stored either.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::domain::filter::Filters;

type SharedCount = Shared<BoxFuture<'static, Result<i64, Arc<anyhow::Error>>>>;

#[derive(Default)]
struct Inner {
    settled: RwLock<HashMap<String, i64>>,
    // Lock order: `in_flight` before `settled`.
    in_flight: Mutex<HashMap<String, SharedCount>>,
    generation: AtomicU64,
}

#[derive(Clone, Default)]
pub struct CountCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CountCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountCache")
            .field("settled", &self.inner.settled.read().len())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish()
    }
}

/// Hex SHA-256 of the filter set's JSON. `Filters` is a `BTreeMap`, so the
/// serialisation is stable across calls.
pub fn cache_key(filters: &Filters) -> String {
    let json = serde_json::to_vec(filters).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

impl CountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.inner.settled.read().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.settled.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every settled count and detaches running computations: their
    /// callers still get a value, but it is not stored and later callers start
    /// a fresh computation.
    pub fn invalidate_all(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.settled.write().clear();
        in_flight.clear();
    }

    /// Returns the cached count for `key`, or runs `compute` once for all
    /// concurrent callers asking for the same key.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> anyhow::Result<i64>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<i64>> + Send + 'static,
    {
        if let Some(hit) = self.get(key) {
            tracing::debug!(key, "count cache hit");
            return Ok(hit);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(hit) = self.get(key) {
                return Ok(hit);
            }
            match in_flight.get(key) {
                Some(running) => {
                    tracing::debug!(key, "joining in-flight count");
                    running.clone()
                }
                None => {
                    tracing::debug!(key, "count cache miss, computing");
                    let generation = self.inner.generation.load(Ordering::SeqCst);
                    let fut = self.settle(key.to_string(), generation, compute());
                    in_flight.insert(key.to_string(), fut.clone());
                    fut
                }
            }
        };

        shared
            .await
            .map_err(|err| anyhow::anyhow!("count failed: {err:#}"))
    }

    fn settle<Fut>(&self, key: String, generation: u64, compute: Fut) -> SharedCount
    where
        Fut: Future<Output = anyhow::Result<i64>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let result = compute.await;
            let mut in_flight = inner.in_flight.lock();
            if inner.generation.load(Ordering::SeqCst) == generation {
                if let Ok(count) = &result {
                    inner.settled.write().insert(key.clone(), *count);
                }
                in_flight.remove(&key);
            } else {
                tracing::debug!(key = %key, "discarding count computed before invalidation");
            }
            drop(in_flight);
            result.map_err(Arc::new)
        }
        .boxed()
        .shared()
    }
}

//! Per-scan memoization of probe results keyed by `(host, port)`.
//!
//! The map is split into shards, each behind its own `RwLock`, and every key
//! owns a `OnceCell`. The lock is held only to find or insert the cell, so a
//! slow probe never blocks lookups of other keys, and concurrent callers for
//! the same key wait on the one in-flight probe instead of repeating it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

const SHARDS: usize = 16;

pub type ProbeKey = (IpAddr, u16);

type Shard<T> = RwLock<HashMap<ProbeKey, Arc<OnceCell<T>>>>;

pub struct ProbeCache<T> {
    shards: Vec<Shard<T>>,
}

impl<T: Clone> Default for ProbeCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ProbeCache<T> {
    pub fn new() -> Self {
        ProbeCache { shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect() }
    }

    fn shard(&self, key: &ProbeKey) -> &Shard<T> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARDS]
    }

    async fn cell(&self, key: ProbeKey) -> Arc<OnceCell<T>> {
        let shard = self.shard(&key);
        let existing = shard.read().await.get(&key).cloned();
        match existing {
            Some(cell) => cell,
            None => shard.write().await.entry(key).or_default().clone(),
        }
    }

    /// Cached value for `key`, running `probe` only if no value exists yet.
    pub async fn get_or_probe<F, Fut>(&self, key: ProbeKey, probe: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.cell(key).await.get_or_init(probe).await.clone()
    }
}

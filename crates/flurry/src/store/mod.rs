//! Key-value store capability used by shard workers.

mod memcache;

pub use memcache::{MemcacheFactory, MemcacheStore, validate_key};

use async_trait::async_trait;

use crate::config::ShardKey;
use crate::error::StoreError;

/// A remote store accepting `put(key, value)`.
///
/// Each shard worker owns exactly one store, so implementations need not be
/// shareable across tasks.
#[async_trait]
pub trait KeyValueStore: Send {
    /// Write `value` under `key`.
    async fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Endpoint address, for logging.
    fn address(&self) -> &str;
}

/// Creates one store per shard at pipeline start.
pub trait StoreFactory: Send + Sync {
    fn create(&self, shard: &ShardKey, address: &str) -> Box<dyn KeyValueStore>;
}

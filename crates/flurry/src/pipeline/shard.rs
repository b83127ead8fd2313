//! Shard table: one bounded queue per destination key.
//!
//! Dispatchers share the sending side of every queue; each queue has exactly
//! one receiving worker. A full queue suspends the sender, which is what
//! bounds memory when a worker falls behind.

use indexmap::IndexMap;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tracing::debug;

use super::FileId;
use crate::config::ShardKey;
use crate::record::Record;

/// Messages consumed by a shard worker, in queue order.
#[derive(Debug)]
pub enum ShardMessage {
    /// A record to write. The permit is released once the write finishes.
    Record {
        file: FileId,
        record: Record,
        permit: OwnedSemaphorePermit,
    },
    /// No more records for `file` will be queued on this shard.
    FileComplete { file: FileId },
    /// No more records for any file; the worker should exit.
    Shutdown,
}

/// The shard's queue no longer has a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardClosed;

/// Producer handle for one shard.
#[derive(Debug, Clone)]
pub struct Shard {
    key: ShardKey,
    address: String,
    tx: mpsc::Sender<ShardMessage>,
}

impl Shard {
    /// Create a shard and the receiving end of its queue.
    pub fn channel(
        key: ShardKey,
        address: impl Into<String>,
        capacity: usize,
    ) -> (Self, ShardInbox) {
        let address = address.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shard = Shard {
            key: key.clone(),
            address: address.clone(),
            tx,
        };
        (shard, ShardInbox { key, address, rx })
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue a message, waiting while the queue is full.
    pub async fn enqueue(&self, message: ShardMessage) -> Result<(), ShardClosed> {
        self.tx.send(message).await.map_err(|_| ShardClosed)
    }

    /// Messages currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side of a shard queue, handed to its worker.
#[derive(Debug)]
pub struct ShardInbox {
    pub key: ShardKey,
    pub address: String,
    pub rx: mpsc::Receiver<ShardMessage>,
}

/// Static routing table from destination key to shard.
#[derive(Debug)]
pub struct ShardTable {
    shards: IndexMap<ShardKey, Shard>,
}

impl ShardTable {
    /// Build one shard per endpoint, keeping configuration order.
    pub fn build(
        endpoints: &IndexMap<ShardKey, String>,
        queue_capacity: usize,
    ) -> (Self, Vec<ShardInbox>) {
        let mut shards = IndexMap::with_capacity(endpoints.len());
        let mut inboxes = Vec::with_capacity(endpoints.len());

        for (key, address) in endpoints {
            let (shard, inbox) = Shard::channel(key.clone(), address.as_str(), queue_capacity);
            shards.insert(key.clone(), shard);
            inboxes.push(inbox);
        }

        (Self { shards }, inboxes)
    }

    /// Look up the shard for a destination key, with its position in the table.
    pub fn resolve(&self, destination: &str) -> Option<(usize, &Shard)> {
        self.shards
            .get_full(destination)
            .map(|(index, _, shard)| (index, shard))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }

    /// Tell every worker to exit once its queue is drained.
    pub async fn shutdown(&self) {
        for shard in self.iter() {
            if shard.enqueue(ShardMessage::Shutdown).await.is_err() {
                debug!(shard = %shard.key(), "Shard worker already stopped");
            }
        }
    }
}

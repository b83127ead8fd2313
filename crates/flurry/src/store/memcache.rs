//! Memcached client speaking the text protocol.
//!
//! Only `set` is needed. The connection is opened lazily and dropped after
//! any failure so the next write reconnects.

use std::time::Duration;

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{KeyValueStore, StoreFactory};
use crate::config::{ShardKey, StoreConfig};
use crate::error::{ConnectSnafu, InvalidKeySnafu, IoSnafu, StoreError};

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// Check that `key` can be sent in a text-protocol command.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control());
    ensure!(valid, InvalidKeySnafu { key });
    Ok(())
}

/// One connection to one memcached endpoint.
pub struct MemcacheStore {
    address: String,
    timeout: Duration,
    conn: Option<BufStream<TcpStream>>,
}

impl MemcacheStore {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            conn: None,
        }
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let address = self.address.as_str();
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let stream = TcpStream::connect(address)
                    .await
                    .context(ConnectSnafu { address })?;
                stream.set_nodelay(true).context(ConnectSnafu { address })?;
                debug!(address, "Connected to memcached");
                BufStream::new(stream)
            }
        };
        let conn = self.conn.insert(conn);

        let header = format!("set {key} 0 0 {}\r\n", value.len());
        conn.write_all(header.as_bytes())
            .await
            .context(IoSnafu { address })?;
        conn.write_all(value).await.context(IoSnafu { address })?;
        conn.write_all(b"\r\n").await.context(IoSnafu { address })?;
        conn.flush().await.context(IoSnafu { address })?;

        let mut response = String::new();
        let read = conn
            .read_line(&mut response)
            .await
            .context(IoSnafu { address })?;
        if read == 0 {
            return Err(StoreError::Io {
                address: address.to_string(),
                source: std::io::ErrorKind::UnexpectedEof.into(),
            });
        }

        match response.trim_end() {
            "STORED" => Ok(()),
            other => Err(StoreError::Rejected {
                address: address.to_string(),
                response: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemcacheStore {
    async fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;

        let result = match timeout(self.timeout, self.set(key, value)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                address: self.address.clone(),
            }),
        };

        // A half-written command leaves the stream unusable.
        if matches!(
            result,
            Err(StoreError::Io { .. } | StoreError::Timeout { .. } | StoreError::Connect { .. })
        ) {
            self.conn = None;
        }
        result
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Creates a [`MemcacheStore`] per shard.
#[derive(Debug, Clone)]
pub struct MemcacheFactory {
    timeout: Duration,
}

impl MemcacheFactory {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.socket_timeout_ms),
        }
    }
}

impl StoreFactory for MemcacheFactory {
    fn create(&self, _shard: &ShardKey, address: &str) -> Box<dyn KeyValueStore> {
        Box::new(MemcacheStore::new(address, self.timeout))
    }
}

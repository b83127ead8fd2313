//! Destination key identifying one shard.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier for a destination shard (`idfa`, `gaid`, ...).
///
/// Implements `Borrow<str>` so shard maps can be queried with the raw first
/// field of an input line without allocating.
///
/// # Examples
///
/// ```
/// use flurry::config::ShardKey;
///
/// let key = ShardKey::new("idfa");
/// assert_eq!(key.id(), "idfa");
/// ```
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(String);

impl ShardKey {
    /// Create a new shard key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShardKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ShardKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

//! Cache store adapter.
//!
//! The engine talks to its key/value backend only through [`CacheStore`].
//! Backends that can list keys by glob pattern additionally expose
//! [`KeyEnumeration`]; everything class-scoped or prefix-scoped depends on it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::Attributes;
use crate::error::CacheResult;

/// A class that has been remembered at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClass {
    pub class_name: String,
    pub primary_key: String,
}

/// What a cache key holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    /// Full attribute snapshot, stored under the primary cache key.
    Record(Attributes),
    /// Primary cache key, stored under every secondary cache key.
    Pointer(String),
    /// Contents of the class registry key.
    ClassList(Vec<RegisteredClass>),
}

impl StoredValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::Pointer(_) => "pointer",
            Self::ClassList(_) => "class_list",
        }
    }
}

/// Key/value backend used by the cache engine.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<StoredValue>>;

    async fn put(&self, key: &str, value: StoredValue, ttl: Duration) -> CacheResult<()>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Key enumeration, when the backend supports it.
    fn enumeration(&self) -> Option<&dyn KeyEnumeration> {
        None
    }
}

/// Pattern-based key listing.
///
/// Keys returned by [`keys_matching`](Self::keys_matching) are the backend's
/// raw keys, i.e. they include [`key_prefix`](Self::key_prefix). Patterns
/// passed in must include it as well.
#[async_trait]
pub trait KeyEnumeration: Send + Sync {
    /// Prefix the backend prepends to every key it stores.
    fn key_prefix(&self) -> &str;

    /// Glob match (`*`, `?`, `[...]`, `\` escapes) over all live keys.
    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>>;
}

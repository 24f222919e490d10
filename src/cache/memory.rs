//! In-process cache backend.
//!
//! Values are kept JSON-encoded so they go through the same serde path a
//! network backend would. Expiry uses the monotonic clock and is applied
//! lazily on access.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::debug;

use super::store::{CacheStore, KeyEnumeration, StoredValue};
use crate::error::{CacheError, CacheResult};

struct MemoryEntry {
    payload: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-memory [`CacheStore`] with optional key enumeration.
pub struct MemoryStore {
    namespace: String,
    enumerable: bool,
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// A store that supports key enumeration and adds no key prefix.
    pub fn new() -> Self {
        Self {
            namespace: String::new(),
            enumerable: true,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// A store that declines key enumeration, like most plain key/value backends.
    pub fn without_enumeration() -> Self {
        Self {
            enumerable: false,
            ..Self::new()
        }
    }

    /// Prefix every stored key with `namespace`, the way shared backends
    /// isolate applications from each other.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let guard = self.entries.read().await;
        guard.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw keys of live entries, namespace included.
    pub async fn raw_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let guard = self.entries.read().await;
        guard
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        before - guard.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn raw_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<StoredValue>> {
        let raw_key = self.raw_key(key);
        let guard = self.entries.read().await;
        match guard.get(&raw_key) {
            Some(entry) if entry.is_live(Instant::now()) => {
                Ok(Some(serde_json::from_str(&entry.payload)?))
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: StoredValue, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_string(&value)?;
        let expires_at = Instant::now().checked_add(ttl);
        let mut guard = self.entries.write().await;
        guard.insert(
            self.raw_key(key),
            MemoryEntry {
                payload,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut guard = self.entries.write().await;
        let removed = guard.remove(&self.raw_key(key));
        Ok(removed.is_some_and(|entry| entry.is_live(Instant::now())))
    }

    fn enumeration(&self) -> Option<&dyn KeyEnumeration> {
        if self.enumerable { Some(self) } else { None }
    }
}

#[async_trait]
impl KeyEnumeration for MemoryStore {
    fn key_prefix(&self) -> &str {
        &self.namespace
    }

    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let keys: Vec<String> = self
            .raw_keys()
            .await
            .into_iter()
            .filter(|key| matcher.is_match(key))
            .collect();
        debug!(pattern, matched = keys.len(), "enumerated memory store keys");
        Ok(keys)
    }
}

/// Translate a glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut regex = String::from("(?s)^");
    let mut chars = pattern.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => regex.push_str(r"\\"),
            },
            '[' => {
                let rest = chars.as_str();
                match class_body(rest) {
                    Some((class, consumed)) => {
                        regex.push_str(&class);
                        chars = rest[consumed..].chars();
                    }
                    None => regex.push_str(r"\["),
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex)
        .map_err(|err| CacheError::backend(format!("invalid key pattern `{pattern}`: {err}")))
}

/// Convert the body of a `[...]` class that follows an opening bracket.
///
/// Returns the regex class and the number of bytes consumed, including the
/// closing bracket, or `None` if the class is never closed.
fn class_body(rest: &str) -> Option<(String, usize)> {
    let mut class = String::from("[");
    let mut iter = rest.char_indices().peekable();

    if let Some(&(_, '^' | '!')) = iter.peek() {
        class.push('^');
        iter.next();
    }

    let mut empty = true;
    while let Some((index, ch)) = iter.next() {
        match ch {
            ']' if !empty => {
                class.push(']');
                return Some((class, index + 1));
            }
            '\\' => {
                let (_, escaped) = iter.next()?;
                class.push('\\');
                class.push(escaped);
            }
            '[' | ']' | '&' | '~' => {
                class.push('\\');
                class.push(ch);
            }
            other => class.push(other),
        }
        empty = false;
    }
    None
}

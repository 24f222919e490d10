//! Unikey Cache System
//!
//! Caches one copy of each entity record and makes it reachable through every
//! unique key the entity declares:
//!
//! - **Record**: the attribute snapshot, stored under the primary cache key
//! - **Pointer**: stored under each other unique key, holding the primary key
//! - **Registry**: `{prefix}::CachedClasses`, the classes that were remembered
//!
//! ## Configuration
//!
//! Behavior is controlled via `unikey.toml` (see [`crate::config`]):
//!
//! ```toml
//! [cache]
//! prefix = "unikey"
//! enabled = true
//! default_expiration_minutes = 60
//!
//! [query_log]
//! enabled = false
//! ```

mod context;
mod engine;
pub mod keys;
mod lock;
mod memory;
mod query_log;
mod registry;
mod store;
mod timer;

pub use context::CacheContext;
pub use engine::{BulkOutcome, ClassCacheCount, IndirectionCache};
pub use keys::{CacheKeys, UniqueKeyGroups};
pub use memory::MemoryStore;
pub use query_log::{LogEntry, Query, QueryLog};
pub use store::{CacheStore, KeyEnumeration, RegisteredClass, StoredValue};
pub use timer::Stopwatch;

pub(crate) use query_log::{METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_LOOKUP_MS, METRIC_CACHE_MISS_TOTAL};

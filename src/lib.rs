//! Read-through cache for database-backed entities.
//!
//! Every unique key of an entity (its primary key and any declared unique
//! column groups) resolves to one cached copy of the record. The record is
//! stored once under its primary cache key; every other key stores a pointer
//! to it. See [`cache::IndirectionCache`] for the lifecycle operations.

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod telemetry;

pub use cache::{
    BulkOutcome, CacheContext, CacheKeys, CacheStore, ClassCacheCount, IndirectionCache,
    KeyEnumeration, LogEntry, MemoryStore, Query, QueryLog, RegisteredClass, Stopwatch,
    StoredValue,
};
pub use entity::{AttributeValue, Attributes, CacheableEntity, EntityDescriptor};
pub use error::{CacheError, CacheResult};

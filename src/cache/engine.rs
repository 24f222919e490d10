//! Indirection cache engine.
//!
//! An entity is stored once, under its primary cache key. Every other unique
//! key of the entity stores the primary key string instead, so a record can
//! be found through any of its unique keys while a single write to the
//! primary key updates what all of them resolve to.
//!
//! Nothing here is transactional. Between the primary write and the pointer
//! writes, or during a `forget`, readers may see a pointer without its record
//! (reads as a miss) or a record without its pointers.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::context::CacheContext;
use super::keys::{self, CacheKeys};
use super::query_log::{Query, QueryLog};
use super::registry;
use super::store::{CacheStore, RegisteredClass, StoredValue};
use super::timer::Stopwatch;
use crate::entity::{Attributes, CacheableEntity, EntityDescriptor};
use crate::error::{CacheError, CacheResult};

/// Result of a best-effort bulk operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// False when the backend cannot enumerate keys; nothing was attempted.
    pub supported: bool,
    /// Keys returned by enumeration.
    pub matched: usize,
    /// Keys actually removed.
    pub deleted: usize,
    /// Backend calls that failed (enumeration or individual deletes).
    pub failed: usize,
}

impl BulkOutcome {
    fn unsupported() -> Self {
        Self::default()
    }

    /// True when the operation ran and every backend call succeeded.
    pub fn is_complete(&self) -> bool {
        self.supported && self.failed == 0
    }
}

/// A registered class with the number of its cached records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCacheCount {
    pub class: RegisteredClass,
    /// `None` when the backend cannot enumerate keys.
    pub count: Option<usize>,
}

enum Enumerated {
    Unsupported,
    Failed,
    Keys(Vec<String>),
}

pub struct IndirectionCache<S> {
    store: Arc<S>,
    context: Arc<CacheContext>,
    log: Arc<QueryLog>,
}

impl<S> Clone for IndirectionCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            context: Arc::clone(&self.context),
            log: Arc::clone(&self.log),
        }
    }
}

impl<S: CacheStore> IndirectionCache<S> {
    pub fn new(store: Arc<S>, context: Arc<CacheContext>, log: Arc<QueryLog>) -> Self {
        Self {
            store,
            context,
            log,
        }
    }

    /// Engine with a default context and a disabled query log.
    pub fn with_store(store: Arc<S>) -> Self {
        Self::new(
            store,
            Arc::new(CacheContext::default()),
            Arc::new(QueryLog::default()),
        )
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn context(&self) -> &CacheContext {
        &self.context
    }

    pub fn query_log(&self) -> &QueryLog {
        &self.log
    }

    pub fn is_active(&self) -> bool {
        self.context.is_active()
    }

    pub fn set_active(&self, active: bool) {
        self.context.set_active(active);
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.log.is_enabled()
    }

    pub fn set_logging_enabled(&self, enabled: bool) {
        self.log.set_enabled(enabled);
    }

    pub fn supports_enumeration(&self) -> bool {
        self.store.enumeration().is_some()
    }

    pub fn cache_keys(
        &self,
        descriptor: &EntityDescriptor,
        attributes: &Attributes,
    ) -> CacheResult<CacheKeys> {
        keys::cache_keys(self.context.prefix(), descriptor, attributes)
    }

    pub fn primary_cache_key(
        &self,
        descriptor: &EntityDescriptor,
        attributes: &Attributes,
    ) -> CacheResult<Option<String>> {
        keys::primary_cache_key(self.context.prefix(), descriptor, attributes)
    }

    /// Store the snapshot under its primary key and point every other unique
    /// key at it, then make sure the class is registered.
    ///
    /// Returns false, writing nothing, when the primary key is unset.
    #[instrument(skip_all, fields(class = descriptor.class_name()))]
    pub async fn remember(
        &self,
        descriptor: &EntityDescriptor,
        attributes: &Attributes,
    ) -> CacheResult<bool> {
        let keys = self.cache_keys(descriptor, attributes)?;
        let Some(primary) = keys.primary() else {
            debug!("primary key attribute unset; nothing remembered");
            return Ok(false);
        };

        let ttl = self.context.expiration_for(descriptor);
        self.store
            .put(primary, StoredValue::Record(attributes.clone()), ttl)
            .await?;
        for (signature, key) in keys.secondary() {
            debug!(signature, "writing pointer");
            self.store
                .put(key, StoredValue::Pointer(primary.to_string()), ttl)
                .await?;
        }

        registry::register(
            self.store.as_ref(),
            &keys::registry_key(self.context.prefix()),
            RegisteredClass {
                class_name: descriptor.class_name().to_string(),
                primary_key: descriptor.primary_key().to_string(),
            },
            self.context.registry_expiration(),
        )
        .await?;

        Ok(true)
    }

    /// Read a cached record by any of its keys.
    ///
    /// With the master switch off this returns `None` without touching the
    /// backend unless `bypass_global_switch` is set. Pointers are followed one
    /// hop; a pointer to anything but a record reads as `None`.
    pub async fn get(
        &self,
        key: &str,
        bypass_global_switch: bool,
    ) -> CacheResult<Option<Attributes>> {
        if !bypass_global_switch && !self.context.is_active() {
            return Ok(None);
        }

        match self.store.get(key).await? {
            Some(StoredValue::Record(attributes)) => Ok(Some(attributes)),
            Some(StoredValue::Pointer(target)) => match self.store.get(&target).await? {
                Some(StoredValue::Record(attributes)) => Ok(Some(attributes)),
                Some(other) => {
                    warn!(
                        key,
                        target = %target,
                        kind = other.kind(),
                        "pointer does not lead to a record; not following further"
                    );
                    Ok(None)
                }
                None => Ok(None),
            },
            Some(StoredValue::ClassList(_)) => {
                debug!(key, "registry key read as a record key");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Delete the record and every pointer computable from the snapshot.
    ///
    /// Call with the snapshot as it was cached (before the change) so that
    /// pointers for since-modified unique columns are removed too. Returns
    /// how many keys existed.
    #[instrument(skip_all, fields(class = descriptor.class_name()))]
    pub async fn forget(
        &self,
        descriptor: &EntityDescriptor,
        attributes: &Attributes,
    ) -> CacheResult<usize> {
        let keys = self.cache_keys(descriptor, attributes)?;
        let mut removed = 0;
        for (_, key) in keys.iter() {
            if self.store.delete(key).await? {
                removed += 1;
            }
        }
        debug!(keys = keys.len(), removed, "forgot entity");
        Ok(removed)
    }

    pub async fn remember_entity<E: CacheableEntity>(&self, entity: &E) -> CacheResult<bool> {
        self.remember(&E::descriptor(), &entity.attributes()).await
    }

    pub async fn forget_entity<E: CacheableEntity>(&self, entity: &E) -> CacheResult<usize> {
        self.forget(&E::descriptor(), &entity.attributes()).await
    }

    /// Answer a lookup from the cache, or load and remember it.
    ///
    /// `lookup` names the columns the caller is querying by. It is served from
    /// the cache only when caching is on globally and for the class, and the
    /// lookup columns form exactly one unique key group. Every call is logged
    /// as a hit or a miss.
    #[instrument(skip_all, fields(class = descriptor.class_name()))]
    pub async fn fetch<F, Fut, E>(
        &self,
        descriptor: &EntityDescriptor,
        lookup: &Attributes,
        query: &Query,
        loader: F,
    ) -> Result<Option<Attributes>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Attributes>, E>>,
        E: From<CacheError>,
    {
        let stopwatch = Stopwatch::started();
        let caching = self.context.is_active() && descriptor.cache_active();

        let key = if caching {
            keys::lookup_key(self.context.prefix(), descriptor, lookup)?
        } else {
            None
        };

        if let Some(key) = key.as_deref() {
            // The switch was sampled above.
            if let Some(record) = self.get(key, true).await? {
                self.log
                    .log_hit(query, &stopwatch, descriptor, std::slice::from_ref(&record));
                return Ok(Some(record));
            }
        }

        let loaded = loader().await?;
        if caching {
            if let Some(record) = loaded.as_ref() {
                self.remember(descriptor, record).await?;
            }
        }
        self.log
            .log_miss(query, &stopwatch, descriptor, loaded.as_slice());
        Ok(loaded)
    }

    /// Classes that have been remembered, in registration order.
    pub async fn cached_classes(&self) -> CacheResult<Vec<RegisteredClass>> {
        registry::load(
            self.store.as_ref(),
            &keys::registry_key(self.context.prefix()),
        )
        .await
    }

    /// Registered classes with the number of primary records each has cached.
    pub async fn cached_classes_with_cache_count(&self) -> CacheResult<Vec<ClassCacheCount>> {
        let classes = self.cached_classes().await?;
        let mut counts = Vec::with_capacity(classes.len());
        for class in classes {
            let descriptor = EntityDescriptor::new(&class.class_name, &class.primary_key);
            let count = match self.enumerate(&self.class_pattern(&descriptor)?).await {
                Enumerated::Keys(keys) => Some(keys.len()),
                Enumerated::Failed => Some(0),
                Enumerated::Unsupported => None,
            };
            counts.push(ClassCacheCount { class, count });
        }
        Ok(counts)
    }

    /// Primary cache keys of every cached record of the class.
    ///
    /// Empty when the backend cannot enumerate keys.
    pub async fn all_cached_primary_keys_with_same_class(
        &self,
        descriptor: &EntityDescriptor,
    ) -> CacheResult<Vec<String>> {
        match self.enumerate(&self.class_pattern(descriptor)?).await {
            Enumerated::Keys(keys) => Ok(keys),
            Enumerated::Unsupported | Enumerated::Failed => Ok(Vec::new()),
        }
    }

    pub async fn count_cached_with_same_class(
        &self,
        descriptor: &EntityDescriptor,
    ) -> CacheResult<usize> {
        Ok(self
            .all_cached_primary_keys_with_same_class(descriptor)
            .await?
            .len())
    }

    /// Delete every cached record of the class.
    ///
    /// Only primary records are matched; their pointers are left to expire and
    /// read as misses meanwhile.
    #[instrument(skip_all, fields(class = descriptor.class_name()))]
    pub async fn forget_all_with_same_class(
        &self,
        descriptor: &EntityDescriptor,
    ) -> CacheResult<BulkOutcome> {
        let pattern = self.class_pattern(descriptor)?;
        Ok(self.delete_matching(&pattern).await)
    }

    /// Delete every key under the configured prefix, registry included.
    #[instrument(skip_all, fields(prefix = self.context.prefix()))]
    pub async fn flush_all(&self) -> BulkOutcome {
        let pattern = keys::prefix_search_pattern(self.context.prefix());
        self.delete_matching(&pattern).await
    }

    fn class_pattern(&self, descriptor: &EntityDescriptor) -> CacheResult<String> {
        keys::class_search_pattern(self.context.prefix(), descriptor)
    }

    async fn enumerate(&self, pattern: &str) -> Enumerated {
        let Some(enumeration) = self.store.enumeration() else {
            debug!(pattern, "backend does not support key enumeration");
            return Enumerated::Unsupported;
        };

        let backend_prefix = enumeration.key_prefix();
        let backend_pattern = format!("{}{pattern}", keys::glob_escape(backend_prefix));
        match enumeration.keys_matching(&backend_pattern).await {
            Ok(raw_keys) => Enumerated::Keys(
                raw_keys
                    .into_iter()
                    .map(|raw| match raw.strip_prefix(backend_prefix) {
                        Some(key) => key.to_string(),
                        None => raw,
                    })
                    .collect(),
            ),
            Err(err) => {
                warn!(pattern, error = %err, "key enumeration failed");
                Enumerated::Failed
            }
        }
    }

    async fn delete_matching(&self, pattern: &str) -> BulkOutcome {
        let keys = match self.enumerate(pattern).await {
            Enumerated::Keys(keys) => keys,
            Enumerated::Unsupported => return BulkOutcome::unsupported(),
            Enumerated::Failed => {
                return BulkOutcome {
                    supported: true,
                    failed: 1,
                    ..BulkOutcome::default()
                };
            }
        };

        let mut outcome = BulkOutcome {
            supported: true,
            matched: keys.len(),
            ..BulkOutcome::default()
        };
        for key in &keys {
            match self.store.delete(key).await {
                Ok(true) => outcome.deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "bulk delete failed; continuing");
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            pattern,
            matched = outcome.matched,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "bulk delete finished"
        );
        outcome
    }
}

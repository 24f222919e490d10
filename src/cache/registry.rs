//! Class registry.
//!
//! A single cache entry lists every class that has been remembered, so
//! operators can see what is cached and how much of it. Updates are a plain
//! read-modify-write against the backend; two racing writers may lose one
//! registration until the next `remember` of that class.

use std::time::Duration;

use tracing::{debug, warn};

use super::store::{CacheStore, RegisteredClass, StoredValue};
use crate::error::CacheResult;

/// Read the registered classes stored under `key`.
pub(crate) async fn load<S>(store: &S, key: &str) -> CacheResult<Vec<RegisteredClass>>
where
    S: CacheStore + ?Sized,
{
    match store.get(key).await? {
        Some(StoredValue::ClassList(classes)) => Ok(classes),
        Some(other) => {
            warn!(
                key,
                kind = other.kind(),
                "class registry key holds an unexpected value; treating as empty"
            );
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}

/// Add `class` to the registry unless it is already listed.
///
/// Returns true when the registry was written.
pub(crate) async fn register<S>(
    store: &S,
    key: &str,
    class: RegisteredClass,
    ttl: Duration,
) -> CacheResult<bool>
where
    S: CacheStore + ?Sized,
{
    let mut classes = load(store, key).await?;
    if classes
        .iter()
        .any(|registered| registered.class_name == class.class_name)
    {
        return Ok(false);
    }

    debug!(class = %class.class_name, "registering cached class");
    classes.push(class);
    store.put(key, StoredValue::ClassList(classes), ttl).await?;
    Ok(true)
}

//! Runtime cache context.
//!
//! Holds what used to be process globals: the key prefix, the master switch
//! and the TTL policy. One context is shared by every engine that should see
//! the same switch; tests build their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::entity::EntityDescriptor;

pub(crate) const DEFAULT_PREFIX: &str = "unikey";
pub(crate) const DEFAULT_EXPIRATION_MINUTES: u64 = 60;
/// One year.
pub(crate) const DEFAULT_REGISTRY_EXPIRATION_MINUTES: u64 = 60 * 24 * 365;

const SECONDS_PER_MINUTE: u64 = 60;

#[derive(Debug)]
pub struct CacheContext {
    prefix: String,
    active: AtomicBool,
    default_expiration_minutes: u64,
    registry_expiration_minutes: u64,
}

impl CacheContext {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            active: AtomicBool::new(true),
            default_expiration_minutes: DEFAULT_EXPIRATION_MINUTES,
            registry_expiration_minutes: DEFAULT_REGISTRY_EXPIRATION_MINUTES,
        }
    }

    pub fn with_active(self, active: bool) -> Self {
        self.set_active(active);
        self
    }

    /// TTL for classes that do not set their own expiration.
    pub fn with_default_expiration_minutes(mut self, minutes: u64) -> Self {
        self.default_expiration_minutes = minutes;
        self
    }

    pub fn with_registry_expiration_minutes(mut self, minutes: u64) -> Self {
        self.registry_expiration_minutes = minutes;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Master switch. Sampled once per operation; concurrent toggles take
    /// effect on the next operation.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn default_expiration_minutes(&self) -> u64 {
        self.default_expiration_minutes
    }

    pub fn registry_expiration_minutes(&self) -> u64 {
        self.registry_expiration_minutes
    }

    /// Record TTL for a class.
    pub fn expiration_for(&self, descriptor: &EntityDescriptor) -> Duration {
        minutes(
            descriptor
                .expiration_minutes()
                .unwrap_or(self.default_expiration_minutes),
        )
    }

    pub fn registry_expiration(&self) -> Duration {
        minutes(self.registry_expiration_minutes)
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl From<&crate::config::CacheSettings> for CacheContext {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self::new(settings.prefix.clone())
            .with_active(settings.enabled)
            .with_default_expiration_minutes(settings.default_expiration_minutes.get())
            .with_registry_expiration_minutes(settings.registry_expiration_minutes.get())
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(SECONDS_PER_MINUTE))
}

//! Cache-hit versus database-query diagnostics.
//!
//! When enabled, every cache-assisted read appends a [`LogEntry`] recording
//! whether the cache answered it, how long it took, the query that ran on a
//! miss and which entities came back. Entries are kept until [`QueryLog::clear`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::lock::mutex_lock;
use super::timer::Stopwatch;
use crate::entity::{AttributeValue, Attributes, EntityDescriptor};

const SOURCE: &str = "cache::query_log";

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "unikey_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "unikey_cache_miss_total";
pub(crate) const METRIC_CACHE_LOOKUP_MS: &str = "unikey_cache_lookup_ms";

/// A parameterized query with its positional bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    template: String,
    bindings: Vec<AttributeValue>,
}

impl Query {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<AttributeValue>) -> Self {
        self.bindings.push(value.into());
        self
    }

    pub fn with_bindings<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        self.bindings.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn bindings(&self) -> &[AttributeValue] {
        &self.bindings
    }

    /// Substitute each `?` with the next binding as a quoted literal.
    ///
    /// Display only. The output is not safe to execute.
    pub fn render(&self) -> String {
        let mut rendered = String::with_capacity(self.template.len());
        let mut bindings = self.bindings.iter();
        let mut rest = self.template.as_str();

        while let Some(position) = rest.find('?') {
            let Some(value) = bindings.next() else {
                break;
            };
            rendered.push_str(&rest[..position]);
            rendered.push('\'');
            rendered.push_str(&escape_literal(&value.to_string()));
            rendered.push('\'');
            rest = &rest[position + 1..];
        }
        rendered.push_str(rest);
        rendered
    }
}

fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | '\'' | '"' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            '\0' => escaped.push_str("\\0"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// One logged cache-assisted read.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: Uuid,
    pub recorded_at: OffsetDateTime,
    pub cache_hit: bool,
    /// `None` when the stopwatch was never started.
    pub time: Option<Duration>,
    /// Rendered query; only set on a miss.
    pub query: Option<String>,
    /// `Class [pk=value]` per returned entity.
    pub entities: Vec<String>,
}

pub struct QueryLog {
    enabled: AtomicBool,
    entries: Mutex<Vec<LogEntry>>,
}

impl QueryLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn log_hit(
        &self,
        query: &Query,
        stopwatch: &Stopwatch,
        descriptor: &EntityDescriptor,
        results: &[Attributes],
    ) {
        self.record(true, query, stopwatch, descriptor, results);
    }

    pub fn log_miss(
        &self,
        query: &Query,
        stopwatch: &Stopwatch,
        descriptor: &EntityDescriptor,
        results: &[Attributes],
    ) {
        self.record(false, query, stopwatch, descriptor, results);
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<LogEntry> {
        mutex_lock(&self.entries, SOURCE, "entries").clone()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "hit_count")
            .iter()
            .filter(|entry| entry.cache_hit)
            .count()
    }

    pub fn miss_count(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "miss_count")
            .iter()
            .filter(|entry| !entry.cache_hit)
            .count()
    }

    /// Sum of recorded times; with `queries_only`, misses only.
    pub fn total_execution_time(&self, queries_only: bool) -> Duration {
        mutex_lock(&self.entries, SOURCE, "total_execution_time")
            .iter()
            .filter(|entry| !queries_only || !entry.cache_hit)
            .filter_map(|entry| entry.time)
            .sum()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    fn record(
        &self,
        cache_hit: bool,
        query: &Query,
        stopwatch: &Stopwatch,
        descriptor: &EntityDescriptor,
        results: &[Attributes],
    ) {
        if !self.is_enabled() {
            return;
        }

        let time = stopwatch.elapsed();
        let entities: Vec<String> = results
            .iter()
            .map(|attributes| describe_entity(descriptor, attributes))
            .collect();
        let query = (!cache_hit).then(|| query.render());
        let elapsed_ms = time.map(|time| time.as_secs_f64() * 1000.0);

        if cache_hit {
            counter!(METRIC_CACHE_HIT_TOTAL, "class" => descriptor.class_name().to_string())
                .increment(1);
        } else {
            counter!(METRIC_CACHE_MISS_TOTAL, "class" => descriptor.class_name().to_string())
                .increment(1);
        }
        if let Some(elapsed_ms) = elapsed_ms {
            histogram!(
                METRIC_CACHE_LOOKUP_MS,
                "outcome" => if cache_hit { "hit" } else { "miss" }
            )
            .record(elapsed_ms);
        }

        debug!(
            cache = if cache_hit { "hit" } else { "miss" },
            class = descriptor.class_name(),
            elapsed_ms,
            entity_count = entities.len(),
            query = query.as_deref(),
            "cache-assisted read"
        );

        let entry = LogEntry {
            id: Uuid::new_v4(),
            recorded_at: OffsetDateTime::now_utc(),
            cache_hit,
            time,
            query,
            entities,
        };
        mutex_lock(&self.entries, SOURCE, "record").push(entry);
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new(false)
    }
}

impl From<&crate::config::QueryLogSettings> for QueryLog {
    fn from(settings: &crate::config::QueryLogSettings) -> Self {
        Self::new(settings.enabled)
    }
}

fn describe_entity(descriptor: &EntityDescriptor, attributes: &Attributes) -> String {
    let primary_key = descriptor.primary_key();
    let value = attributes
        .get(primary_key)
        .map_or_else(|| "?".to_string(), ToString::to_string);
    format!("{} [{primary_key}={value}]", descriptor.class_name())
}

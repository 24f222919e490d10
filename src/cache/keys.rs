//! Cache key derivation.
//!
//! Keys follow the layout `{prefix}::{class}::{serialized column map}` where
//! the column map is restricted to one unique key group, sorted by column name
//! and written in the associative-array form
//! `a:{n}:{s:{len}:"{column}";s:{len}:"{value}";...}`. Lengths are UTF-8 byte
//! counts, so keys written by other clients sharing the same backend line up
//! byte for byte.

use std::collections::BTreeMap;

use crate::entity::{Attributes, EntityDescriptor};
use crate::error::{CacheError, CacheResult};

pub(crate) const SEPARATOR: &str = "::";
pub(crate) const CACHED_CLASSES_SUFFIX: &str = "CachedClasses";

/// Unique key groups keyed by signature (sorted, comma-joined column names).
pub type UniqueKeyGroups = BTreeMap<String, Vec<String>>;

/// Cache keys computed for one attribute snapshot, keyed by group signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    primary_signature: String,
    keys: BTreeMap<String, String>,
}

impl CacheKeys {
    /// The primary cache key, absent while the primary-key attribute is unset.
    pub fn primary(&self) -> Option<&str> {
        self.keys.get(&self.primary_signature).map(String::as_str)
    }

    /// Signature of the primary-key group (the primary-key column name).
    pub fn primary_signature(&self) -> &str {
        &self.primary_signature
    }

    /// Every computed key other than the primary one, in signature order.
    pub fn secondary(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.iter()
            .filter(move |(signature, _)| *signature != self.primary_signature)
    }

    pub fn get(&self, signature: &str) -> Option<&str> {
        self.keys.get(signature).map(String::as_str)
    }

    /// All `(signature, key)` pairs in signature order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.keys
            .iter()
            .map(|(signature, key)| (signature.as_str(), key.as_str()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Resolve the unique key groups of a class.
///
/// The primary-key column is always present as its own group. Groups are
/// deduplicated by signature and returned in signature order.
pub fn unique_key_groups(descriptor: &EntityDescriptor) -> CacheResult<UniqueKeyGroups> {
    validate_descriptor(descriptor)?;

    let primary = vec![descriptor.primary_key().to_string()];
    let mut groups = UniqueKeyGroups::new();

    for group in descriptor
        .unique_keys()
        .iter()
        .chain(std::iter::once(&primary))
    {
        let mut columns = group.clone();
        columns.sort();
        columns.dedup();
        groups.entry(columns.join(",")).or_insert(columns);
    }

    Ok(groups)
}

/// Compute every cache key that the snapshot has values for.
///
/// Groups with a column missing from `attributes` are skipped; an entity that
/// has not been assigned its primary key yet still gets its secondary keys.
pub fn cache_keys(
    prefix: &str,
    descriptor: &EntityDescriptor,
    attributes: &Attributes,
) -> CacheResult<CacheKeys> {
    let groups = unique_key_groups(descriptor)?;
    let keys = groups
        .into_iter()
        .filter_map(|(signature, columns)| {
            build_key(prefix, descriptor.class_name(), &columns, attributes)
                .map(|key| (signature, key))
        })
        .collect();

    Ok(CacheKeys {
        primary_signature: descriptor.primary_key().to_string(),
        keys,
    })
}

/// The primary cache key for the snapshot, if its primary key is set.
pub fn primary_cache_key(
    prefix: &str,
    descriptor: &EntityDescriptor,
    attributes: &Attributes,
) -> CacheResult<Option<String>> {
    let keys = cache_keys(prefix, descriptor, attributes)?;
    Ok(keys.primary().map(str::to_string))
}

/// The cache key addressed by a lookup such as `{email: "a@b.com"}`.
///
/// Returns `None` when the lookup columns do not form exactly one declared
/// unique key group; such lookups cannot be answered from the cache.
pub fn lookup_key(
    prefix: &str,
    descriptor: &EntityDescriptor,
    lookup: &Attributes,
) -> CacheResult<Option<String>> {
    let groups = unique_key_groups(descriptor)?;
    let signature = lookup.keys().map(String::as_str).collect::<Vec<_>>().join(",");

    Ok(groups
        .get(&signature)
        .and_then(|columns| build_key(prefix, descriptor.class_name(), columns, lookup)))
}

/// Key holding the list of classes that have ever been remembered.
pub fn registry_key(prefix: &str) -> String {
    format!("{prefix}{SEPARATOR}{CACHED_CLASSES_SUFFIX}")
}

/// Glob pattern matching every primary cache key of a class.
pub fn class_search_pattern(prefix: &str, descriptor: &EntityDescriptor) -> CacheResult<String> {
    validate_descriptor(descriptor)?;
    let primary_key = descriptor.primary_key();
    let fixed = format!(
        "{}a:1:{{s:{}:\"{}\";",
        class_prefix(prefix, descriptor.class_name()),
        primary_key.len(),
        primary_key
    );
    Ok(format!("{}*", glob_escape(&fixed)))
}

/// Glob pattern matching every key written under `prefix`.
pub fn prefix_search_pattern(prefix: &str) -> String {
    format!("{}{SEPARATOR}*", glob_escape(prefix))
}

/// Escape glob metacharacters so the text matches literally.
pub fn glob_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn class_prefix(prefix: &str, class_name: &str) -> String {
    format!("{prefix}{SEPARATOR}{class_name}{SEPARATOR}")
}

fn build_key(
    prefix: &str,
    class_name: &str,
    columns: &[String],
    attributes: &Attributes,
) -> Option<String> {
    let mut values = BTreeMap::new();
    for column in columns {
        let value = attributes.get(column)?;
        values.insert(column.as_str(), value.to_string());
    }
    Some(class_prefix(prefix, class_name) + &serialize_columns(&values))
}

fn serialize_columns(values: &BTreeMap<&str, String>) -> String {
    let mut serialized = format!("a:{}:{{", values.len());
    for (column, value) in values {
        serialized.push_str(&format!(
            "s:{}:\"{}\";s:{}:\"{}\";",
            column.len(),
            column,
            value.len(),
            value
        ));
    }
    serialized.push('}');
    serialized
}

fn validate_descriptor(descriptor: &EntityDescriptor) -> CacheResult<()> {
    if descriptor.class_name().is_empty() {
        return Err(CacheError::configuration("entity class name is empty"));
    }
    if descriptor.primary_key().is_empty() {
        return Err(CacheError::configuration(format!(
            "entity `{}` does not declare a primary-key column",
            descriptor.class_name()
        )));
    }
    for group in descriptor.unique_keys() {
        if group.is_empty() || group.iter().any(String::is_empty) {
            return Err(CacheError::configuration(format!(
                "entity `{}` declares an empty unique key column",
                descriptor.class_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes;

    fn user() -> EntityDescriptor {
        EntityDescriptor::new("User", "id").with_unique_key(["email"])
    }

    #[test]
    fn primary_group_is_always_present() {
        let groups = unique_key_groups(&EntityDescriptor::new("User", "id")).expect("groups");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("id"), Some(&vec!["id".to_string()]));
    }

    #[test]
    fn groups_dedupe_by_sorted_signature() {
        let descriptor = EntityDescriptor::new("Post", "id")
            .with_unique_key(["slug", "tenant_id"])
            .with_unique_key(["tenant_id", "slug"])
            .with_unique_key(["id"]);

        let groups = unique_key_groups(&descriptor).expect("groups");
        let signatures: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(signatures, vec!["id", "slug,tenant_id"]);
    }

    #[test]
    fn user_scenario_produces_expected_layout() {
        let attrs = attributes! { "id" => 7, "email" => "a@b.com" };
        let keys = cache_keys("App", &user(), &attrs).expect("keys");

        assert_eq!(keys.len(), 2);
        assert_eq!(keys.get("id"), Some(r#"App::User::a:1:{s:2:"id";s:1:"7";}"#));
        assert_eq!(
            keys.get("email"),
            Some(r#"App::User::a:1:{s:5:"email";s:7:"a@b.com";}"#)
        );
        assert_ne!(keys.get("id"), keys.get("email"));
        assert_eq!(keys.primary(), keys.get("id"));
        assert_eq!(keys.secondary().count(), 1);
    }

    #[test]
    fn composite_group_sorts_columns() {
        let descriptor = EntityDescriptor::new("Post", "id").with_unique_key(["tenant_id", "slug"]);
        let attrs = attributes! { "id" => 1, "tenant_id" => 3, "slug" => "hello" };
        let keys = cache_keys("App", &descriptor, &attrs).expect("keys");

        assert_eq!(
            keys.get("slug,tenant_id"),
            Some(r#"App::Post::a:2:{s:4:"slug";s:5:"hello";s:9:"tenant_id";s:1:"3";}"#)
        );
    }

    #[test]
    fn lengths_count_utf8_bytes() {
        let attrs = attributes! { "id" => "é" };
        let key = primary_cache_key("App", &EntityDescriptor::new("User", "id"), &attrs)
            .expect("key")
            .expect("primary key set");
        assert_eq!(key, r#"App::User::a:1:{s:2:"id";s:2:"é";}"#);
    }

    #[test]
    fn keys_are_deterministic() {
        let attrs = attributes! { "id" => 7, "email" => "a@b.com", "name" => "Ann" };
        let first = cache_keys("App", &user(), &attrs).expect("keys");
        let second = cache_keys("App", &user(), &attrs).expect("keys");
        assert_eq!(first, second);
        assert_eq!(
            first.iter().collect::<Vec<_>>(),
            second.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn incomplete_groups_are_skipped() {
        let attrs = attributes! { "email" => "a@b.com" };
        let keys = cache_keys("App", &user(), &attrs).expect("keys");

        assert_eq!(keys.len(), 1);
        assert!(keys.primary().is_none());
        assert!(keys.get("email").is_some());
        assert!(
            primary_cache_key("App", &user(), &attrs)
                .expect("key")
                .is_none()
        );
    }

    #[test]
    fn primary_key_is_part_of_cache_keys() {
        let attrs = attributes! { "id" => 9, "email" => "x@y.z" };
        let keys = cache_keys("App", &user(), &attrs).expect("keys");
        let primary = primary_cache_key("App", &user(), &attrs)
            .expect("key")
            .expect("primary key set");
        assert!(keys.iter().any(|(_, key)| key == primary));
        assert_eq!(keys.primary_signature(), "id");
    }

    #[test]
    fn missing_primary_key_column_is_a_configuration_error() {
        let err = cache_keys("App", &EntityDescriptor::new("User", ""), &attributes! {})
            .expect_err("empty primary key must fail");
        assert!(matches!(err, CacheError::Configuration { .. }));

        let err = unique_key_groups(&EntityDescriptor::new("User", "id").with_unique_key([""]))
            .expect_err("empty group column must fail");
        assert!(matches!(err, CacheError::Configuration { .. }));
    }

    #[test]
    fn lookup_key_requires_an_exact_group() {
        let by_email = lookup_key("App", &user(), &attributes! { "email" => "a@b.com" })
            .expect("lookup")
            .expect("email is a unique group");
        assert_eq!(by_email, r#"App::User::a:1:{s:5:"email";s:7:"a@b.com";}"#);

        let by_name = lookup_key("App", &user(), &attributes! { "name" => "Ann" }).expect("lookup");
        assert!(by_name.is_none());

        let overlapping =
            lookup_key("App", &user(), &attributes! { "id" => 7, "email" => "a@b.com" })
                .expect("lookup");
        assert!(overlapping.is_none());
    }

    #[test]
    fn search_patterns_escape_metacharacters() {
        let pattern =
            class_search_pattern("App", &EntityDescriptor::new("Models[v2]", "id")).expect("pattern");
        assert_eq!(pattern, r#"App::Models\[v2\]::a:1:{s:2:"id";*"#);
        assert_eq!(prefix_search_pattern("App"), "App::*");
        assert_eq!(registry_key("App"), "App::CachedClasses");
    }
}

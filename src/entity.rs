//! Entity descriptors and attribute snapshots.
//!
//! The cache never sees model types directly. Integration code describes each
//! entity class with an [`EntityDescriptor`] and hands over the current column
//! values as an [`Attributes`] snapshot.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Column name to scalar value, ordered by column name.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single scalar column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Renders the value the way it appears inside cache keys and query logs.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(true) => f.write_str("1"),
            Self::Bool(false) => f.write_str("0"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Builds an [`Attributes`] map from `column => value` pairs.
///
/// ```
/// let attrs = unikey_cache::attributes! { "id" => 7, "email" => "a@b.com" };
/// assert_eq!(attrs.len(), 2);
/// ```
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::entity::Attributes::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut attributes = $crate::entity::Attributes::new();
        $(
            attributes.insert(
                ::std::string::String::from($column),
                $crate::entity::AttributeValue::from($value),
            );
        )+
        attributes
    }};
}

/// Static description of a cacheable entity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    class_name: String,
    primary_key: String,
    unique_keys: Vec<Vec<String>>,
    cache_active: bool,
    expiration_minutes: Option<u64>,
}

impl EntityDescriptor {
    /// Describe a class by its fully-qualified name and primary-key column.
    pub fn new(class_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            primary_key: primary_key.into(),
            unique_keys: Vec::new(),
            cache_active: true,
            expiration_minutes: None,
        }
    }

    /// Declare an additional group of columns whose values identify one row.
    pub fn with_unique_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Toggle caching for this class only.
    pub fn with_cache_active(mut self, active: bool) -> Self {
        self.cache_active = active;
        self
    }

    /// Override the record TTL for this class.
    pub fn with_expiration_minutes(mut self, minutes: u64) -> Self {
        self.expiration_minutes = Some(minutes);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Unique key groups as declared, without the implicit primary-key group.
    pub fn unique_keys(&self) -> &[Vec<String>] {
        &self.unique_keys
    }

    pub fn cache_active(&self) -> bool {
        self.cache_active
    }

    pub fn expiration_minutes(&self) -> Option<u64> {
        self.expiration_minutes
    }
}

/// A model type that can describe itself to the cache.
pub trait CacheableEntity {
    fn descriptor() -> EntityDescriptor;

    /// Current column values of this instance.
    fn attributes(&self) -> Attributes;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_key_material() {
        assert_eq!(AttributeValue::Null.to_string(), "");
        assert_eq!(AttributeValue::from(true).to_string(), "1");
        assert_eq!(AttributeValue::from(false).to_string(), "0");
        assert_eq!(AttributeValue::from(7).to_string(), "7");
        assert_eq!(AttributeValue::from(1.5).to_string(), "1.5");
        assert_eq!(AttributeValue::from("a@b.com").to_string(), "a@b.com");
    }

    #[test]
    fn option_maps_none_to_null() {
        assert!(AttributeValue::from(None::<i64>).is_null());
        assert_eq!(AttributeValue::from(Some(3)), AttributeValue::Int(3));
    }

    #[test]
    fn untagged_serde_keeps_scalar_shape() {
        let attrs = crate::attributes! {
            "id" => 7,
            "email" => "a@b.com",
            "score" => 0.5,
            "active" => true,
            "deleted_at" => None::<String>,
        };
        let json = serde_json::to_string(&attrs).expect("serialize attributes");
        assert_eq!(
            json,
            r#"{"active":true,"deleted_at":null,"email":"a@b.com","id":7,"score":0.5}"#
        );

        let decoded: Attributes = serde_json::from_str(&json).expect("deserialize attributes");
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn descriptor_builder_collects_groups() {
        let descriptor = EntityDescriptor::new("App::User", "id")
            .with_unique_key(["email"])
            .with_unique_key(["tenant_id", "slug"])
            .with_cache_active(false)
            .with_expiration_minutes(5);

        assert_eq!(descriptor.class_name(), "App::User");
        assert_eq!(descriptor.primary_key(), "id");
        assert_eq!(descriptor.unique_keys().len(), 2);
        assert!(!descriptor.cache_active());
        assert_eq!(descriptor.expiration_minutes(), Some(5));
    }
}

//! Persisted descriptor forms of fields, relationships and models.
//!
//! These are the shapes stored under `schema` in the catalog and handed to
//! export consumers. Optional keys are omitted when unset.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// A JSON object that keeps its entries in insertion order.
///
/// `serde_json` maps sort their keys, which would lose field and model
/// registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> OrderedMap<T> {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Looks up an entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or replaces an entry, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Iterates over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(String, T)> for OrderedMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Persisted form of a field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Kind name: `integer`, `float`, `string`, `boolean`, `datetime`, `enum`, `json`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Present only when it differs from the kind's default nullability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// Primary key flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    /// Present for primary keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<bool>,
    /// Unique constraint.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    /// Secondary index.
    #[serde(default, skip_serializing_if = "is_false")]
    pub index: bool,
    /// Static default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Default factory name: `now`, `empty_object`, `empty_array`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_factory: Option<String>,
    /// Foreign key target as `Model.field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// Delete policy: `cascade` or `set_null`. Absent means `restrict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    /// Allowed members of an enum field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    /// Inclusive numeric lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Minimum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Persisted form of a relationship definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// `one_to_one`, `one_to_many`, `many_to_one` or `many_to_many`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Target model.
    pub model: String,
    /// Name of the inverse relationship on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_populates: Option<String>,
    /// Junction model for many-to-many.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    /// Field carrying the link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

/// Persisted form of a model definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Schema version, bumped by each alteration.
    #[serde(default = "initial_version")]
    pub version: u32,
    /// Fields in definition order.
    pub fields: OrderedMap<FieldDescriptor>,
    /// Relationships in definition order.
    #[serde(default)]
    pub relationships: OrderedMap<RelationshipDescriptor>,
}

const fn initial_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_map_keeps_insertion_order() {
        let mut map = OrderedMap::new();
        map.insert("zeta", 1);
        map.insert("alpha", 2);
        map.insert("zeta", 3);

        let text = serde_json::to_string(&map).unwrap();
        assert_eq!(text, r#"{"zeta":3,"alpha":2}"#);

        let back: OrderedMap<i32> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn field_descriptor_omits_unset_keys() {
        let desc = FieldDescriptor {
            kind: "string".into(),
            nullable: None,
            primary_key: false,
            auto_increment: None,
            unique: true,
            index: false,
            default: None,
            default_factory: None,
            foreign_key: None,
            on_delete: None,
            choices: None,
            min: None,
            max: None,
            min_length: None,
            max_length: Some(255),
        };

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "string", "unique": true, "max_length": 255})
        );
    }

    #[test]
    fn model_descriptor_defaults_version() {
        let desc: ModelDescriptor =
            serde_json::from_str(r#"{"fields": {"id": {"type": "integer", "primary_key": true}}}"#)
                .unwrap();
        assert_eq!(desc.version, 1);
        assert!(desc.relationships.is_empty());
    }
}

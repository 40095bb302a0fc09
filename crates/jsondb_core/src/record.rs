//! Records and record input conversion.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordId;
use crate::value::Value;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A stored record: its id plus every field of its model.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The primary key value.
    pub id: RecordId,
    /// Field values keyed by field name, primary key included.
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub const fn new(id: RecordId, values: BTreeMap<String, Value>) -> Self {
        Self { id, values }
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Renders the record as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// Conversion of caller input into a field map.
///
/// Implemented for JSON objects, field maps, and lists of `(name, value)`
/// pairs:
///
/// ```rust
/// use jsondb_core::{IntoFields, Value};
/// use serde_json::json;
///
/// let a = json!({"name": "ann", "age": 30}).into_fields().unwrap();
/// let b = [("name", Value::from("ann")), ("age", Value::from(30))]
///     .into_fields()
///     .unwrap();
/// assert_eq!(a, b);
/// ```
pub trait IntoFields {
    /// Performs the conversion.
    fn into_fields(self) -> CoreResult<BTreeMap<String, Value>>;
}

impl IntoFields for BTreeMap<String, Value> {
    fn into_fields(self) -> CoreResult<BTreeMap<String, Value>> {
        Ok(self)
    }
}

impl IntoFields for serde_json::Map<String, serde_json::Value> {
    fn into_fields(self) -> CoreResult<BTreeMap<String, Value>> {
        Ok(self
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect())
    }
}

impl IntoFields for serde_json::Value {
    fn into_fields(self) -> CoreResult<BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => map.into_fields(),
            other => Err(CoreError::validation(
                "input",
                "",
                format!("expected a JSON object, got {other}"),
            )),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> IntoFields for Vec<(K, V)> {
    fn into_fields(self) -> CoreResult<BTreeMap<String, Value>> {
        Ok(self.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> IntoFields for [(K, V); N] {
    fn into_fields(self) -> CoreResult<BTreeMap<String, Value>> {
        Ok(self.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_object_converts() {
        let fields = json!({"a": 1, "b": [1]}).into_fields().unwrap();
        assert_eq!(fields["a"], Value::Int(1));
        assert_eq!(fields["b"], Value::Json(json!([1])));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(json!([1, 2]).into_fields().is_err());
    }

    #[test]
    fn record_serializes_as_object() {
        let record = Record::new(
            RecordId::new(1),
            [("id", Value::Int(1)), ("name", Value::from("x"))]
                .into_fields()
                .unwrap(),
        );
        assert_eq!(record.to_json(), json!({"id": 1, "name": "x"}));
        assert_eq!(serde_json::to_value(&record).unwrap(), record.to_json());
    }
}

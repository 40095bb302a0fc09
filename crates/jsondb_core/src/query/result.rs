//! Query results.

use crate::types::RecordId;
use crate::value::Value;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Rows produced by a query, with their column names.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Output column names: `Model.field` for record columns, the alias or
    /// the group field for grouped queries.
    pub columns: Arc<[String]>,
    /// Output rows.
    pub rows: Vec<Row>,
}

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Id of the driving record; `None` for grouped rows.
    pub id: Option<RecordId>,
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(id: Option<RecordId>, columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self {
            id,
            columns,
            values,
        }
    }

    /// Returns a value by column name.
    ///
    /// Accepts the full column name or, when only one column ends with
    /// it, the bare field name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        column_position(&self.columns, column).map(|i| &self.values[i])
    }

    /// Values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Renders the row as a JSON object keyed by column name.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.columns
                .iter()
                .zip(&self.values)
                .map(|(c, v)| (c.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl QueryResult {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no row matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Driving record ids, in row order.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.rows.iter().filter_map(|r| r.id).collect()
    }

    /// Values of one column, in row order.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let i = column_position(&self.columns, name)?;
        Some(self.rows.iter().map(|r| &r.values[i]).collect())
    }

    /// Renders all rows as a JSON array.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.rows.iter().map(Row::to_json).collect())
    }
}

fn column_position(columns: &[String], name: &str) -> Option<usize> {
    if let Some(i) = columns.iter().position(|c| c == name) {
        return Some(i);
    }
    let mut matches = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.rsplit_once('.').is_some_and(|(_, f)| f == name));
    match (matches.next(), matches.next()) {
        (Some((i, _)), None) => Some(i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> Row {
        let columns: Arc<[String]> = vec![
            "User.id".to_string(),
            "User.name".to_string(),
            "Post.id".to_string(),
        ]
        .into();
        Row::new(
            Some(RecordId::new(1)),
            columns,
            vec![Value::Int(1), Value::from("ann"), Value::Int(7)],
        )
    }

    #[test]
    fn lookup_by_full_or_unique_suffix() {
        let row = row();
        assert_eq!(row.get("User.name"), Some(&Value::from("ann")));
        assert_eq!(row.get("name"), Some(&Value::from("ann")));
        assert_eq!(row.get("Post.id"), Some(&Value::Int(7)));
        assert_eq!(row.get("id"), None);
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn json_rendering() {
        assert_eq!(
            row().to_json(),
            json!({"User.id": 1, "User.name": "ann", "Post.id": 7})
        );
        assert_eq!(serde_json::to_value(row()).unwrap(), row().to_json());
    }
}

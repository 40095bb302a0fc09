//! Record-level validation against a model schema.

use super::model::ModelSchema;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// Validates a full candidate record.
///
/// Unknown fields are rejected. Missing fields take their default, then their
/// factory value, then `Null`. An auto-increment primary key may be missing,
/// in which case it comes back as `Null` for the store to assign.
pub(crate) fn validate_record(
    schema: &ModelSchema,
    mut candidate: BTreeMap<String, Value>,
    clock: &dyn Clock,
) -> CoreResult<BTreeMap<String, Value>> {
    reject_unknown(schema, &candidate)?;

    let mut record = BTreeMap::new();
    for field in schema.fields() {
        let value = match candidate.remove(&field.name) {
            Some(value) => value,
            None if field.primary_key => Value::Null,
            None => field.missing_value(clock),
        };
        let value = if field.primary_key && value.is_null() {
            if !field.auto_increment {
                return Err(CoreError::validation(
                    schema.name(),
                    &field.name,
                    "primary key is required",
                ));
            }
            Value::Null
        } else {
            field.validate_value(schema.name(), value)?
        };
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}

/// Validates only the supplied fields of an update.
pub(crate) fn validate_changes(
    schema: &ModelSchema,
    changes: BTreeMap<String, Value>,
) -> CoreResult<BTreeMap<String, Value>> {
    reject_unknown(schema, &changes)?;

    let mut normalized = BTreeMap::new();
    for (name, value) in changes {
        let Some(field) = schema.field(&name) else {
            continue;
        };
        if field.primary_key {
            return Err(CoreError::validation(
                schema.name(),
                &name,
                "primary key cannot change",
            ));
        }
        normalized.insert(name, field.validate_value(schema.name(), value)?);
    }
    Ok(normalized)
}

/// Normalizes a stored record against the current definition.
///
/// Fields removed since the record was written are dropped. Fields added
/// since take their static default or `Null`.
pub(crate) fn decode_stored(
    schema: &ModelSchema,
    raw: &serde_json::Map<String, serde_json::Value>,
) -> CoreResult<BTreeMap<String, Value>> {
    let mut record = BTreeMap::new();
    for field in schema.fields() {
        let value = match raw.get(&field.name) {
            Some(json) => Value::from_json(json),
            None => field.default.clone().unwrap_or(Value::Null),
        };
        let value = field.validate_value(schema.name(), value).map_err(|e| {
            CoreError::invalid_format(format!("stored record does not match schema: {e}"))
        })?;
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}

fn reject_unknown(schema: &ModelSchema, candidate: &BTreeMap<String, Value>) -> CoreResult<()> {
    match candidate.keys().find(|name| schema.field(name).is_none()) {
        Some(unknown) => Err(CoreError::validation(
            schema.name(),
            unknown.as_str(),
            "unknown field",
        )),
        None => Ok(()),
    }
}

//! Staged mutations and constraint checks.

use super::{RecordStore, StagedOp};
use crate::chunk::Fields;
use crate::error::{CoreError, CoreResult};
use crate::query::Predicate;
use crate::record::Record;
use crate::schema::{ModelSchema, OnDelete};
use crate::types::{RecordId, View};
use crate::value::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A record the delete planner decided to remove.
struct PlannedDelete {
    schema: Arc<ModelSchema>,
    id: RecordId,
}

impl RecordStore {
    /// Validates and stages a new record.
    ///
    /// Auto-increment keys take the model's next id. An explicit id must be
    /// unused and moves the counter past itself.
    pub fn create(&mut self, model: &str, data: Fields) -> CoreResult<Record> {
        let schema = self.schema(model)?;
        let mut fields = self.registry.validate(model, data, self.clock.as_ref())?;
        let pk = schema.primary_key().name.clone();
        let next = self.next_id(model, View::Staged);

        let id = match fields.get(&pk).and_then(Value::as_i64) {
            Some(explicit) => {
                let id = RecordId::new(u64::try_from(explicit).map_err(|_| {
                    CoreError::validation(model, &pk, "primary key must be >= 0")
                })?);
                if self.chunks.locate(model, id, View::Staged).is_some() {
                    return Err(CoreError::uniqueness(model, &pk, id.to_string()));
                }
                id
            }
            None => {
                let value = i64::try_from(next)
                    .map_err(|_| CoreError::validation(model, &pk, "id space exhausted"))?;
                fields.insert(pk.clone(), Value::Int(value));
                RecordId::new(next)
            }
        };

        self.check_unique(&schema, id, &fields, None)?;
        self.check_foreign_keys(&schema, &fields, None)?;

        self.chunks.insert(&schema, id, fields.clone())?;
        self.indexes.stage_insert(&schema, id, &fields);
        self.staged_next_ids
            .insert(model.to_string(), next.max(id.as_u64() + 1));
        self.journal.push(StagedOp::Created {
            model: model.to_string(),
            id,
        });
        Ok(Record::new(id, fields))
    }

    /// Validates and stages changes to an existing record.
    ///
    /// Only the supplied fields are validated; the others keep their values.
    /// Supplying the record's own primary key value is allowed and ignored.
    pub fn update(&mut self, model: &str, id: RecordId, changes: Fields) -> CoreResult<Record> {
        let schema = self.schema(model)?;
        let mut changes = changes;
        let pk = &schema.primary_key().name;
        if changes
            .get(pk)
            .and_then(Value::as_i64)
            .is_some_and(|v| u64::try_from(v).ok() == Some(id.as_u64()))
        {
            changes.remove(pk);
        }
        let changes = self.registry.validate_partial(model, changes)?;
        let current = self.get(model, id, View::Staged)?;

        let changed: Fields = changes
            .into_iter()
            .filter(|(name, value)| current.values.get(name) != Some(value))
            .collect();
        if changed.is_empty() {
            return Ok(current);
        }
        let mut fields = current.values.clone();
        fields.extend(changed.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.check_unique(&schema, id, &fields, Some(&changed))?;
        self.check_foreign_keys(&schema, &fields, Some(&changed))?;
        self.check_referenced_keys_unchanged(&schema, id, &current.values, &changed)?;

        self.stage_replace(&schema, id, &current.values, fields.clone())?;
        Ok(Record::new(id, fields))
    }

    fn stage_replace(
        &mut self,
        schema: &ModelSchema,
        id: RecordId,
        old: &Fields,
        new: Fields,
    ) -> CoreResult<()> {
        self.chunks.replace(schema, id, new.clone())?;
        self.indexes.stage_remove(schema, id, old);
        self.indexes.stage_insert(schema, id, &new);
        self.journal.push(StagedOp::Updated {
            model: schema.name().to_string(),
            id,
        });
        Ok(())
    }

    /// Stages the deletion of a record and applies the delete policy of
    /// every foreign key pointing at it.
    ///
    /// The whole cascade is planned before anything is staged, so a
    /// `restrict` violation anywhere leaves the transaction untouched.
    /// Returns the number of records deleted, cascades included.
    pub fn delete(&mut self, model: &str, id: RecordId) -> CoreResult<u64> {
        let mark = self.journal.len();
        let result = self.delete_inner(model, id);
        self.poison_if_partial(&result, mark);
        result
    }

    fn delete_inner(&mut self, model: &str, id: RecordId) -> CoreResult<u64> {
        let root = self.schema(model)?;
        if self.chunks.locate(model, id, View::Staged).is_none() {
            return Err(CoreError::not_found(model, id.as_u64()));
        }

        let mut doomed: HashSet<(String, RecordId)> = HashSet::new();
        let mut deletes: Vec<PlannedDelete> = Vec::new();
        let mut nulls: Vec<(String, RecordId, String)> = Vec::new();
        let mut restricted: Vec<(String, RecordId, CoreError)> = Vec::new();
        let mut queue = VecDeque::from([(root, id)]);

        while let Some((schema, id)) = queue.pop_front() {
            if !doomed.insert((schema.name().to_string(), id)) {
                continue;
            }
            let record = self.get(schema.name(), id, View::Staged)?;
            for link in self.registry.referencing(schema.name()) {
                let Some(value) = record.get(&link.target_field) else {
                    continue;
                };
                for referrer in self.ids_matching(&link.model, &link.field, value, View::Staged)? {
                    match link.on_delete {
                        OnDelete::Restrict => restricted.push((
                            link.model.clone(),
                            referrer,
                            CoreError::foreign_key(
                                &link.model,
                                &link.field,
                                format!(
                                    "record {referrer} still references {} {id}; delete is restricted",
                                    schema.name()
                                ),
                            ),
                        )),
                        OnDelete::Cascade => {
                            queue.push_back((self.schema(&link.model)?, referrer));
                        }
                        OnDelete::SetNull => {
                            nulls.push((link.model.clone(), referrer, link.field.clone()));
                        }
                    }
                }
            }
            deletes.push(PlannedDelete { schema, id });
        }

        // A restricted referrer that is itself being deleted does not block.
        if let Some((_, _, err)) = restricted
            .into_iter()
            .find(|(model, referrer, _)| !doomed.contains(&(model.clone(), *referrer)))
        {
            return Err(err);
        }

        for (model, id, field) in nulls {
            if doomed.contains(&(model.clone(), id)) {
                continue;
            }
            let schema = self.schema(&model)?;
            let current = self.get(&model, id, View::Staged)?;
            let mut fields = current.values.clone();
            fields.insert(field, Value::Null);
            self.stage_replace(&schema, id, &current.values, fields)?;
        }

        let count = deletes.len() as u64;
        for PlannedDelete { schema, id } in deletes {
            let fields = self.chunks.remove(&schema, id)?;
            self.indexes.stage_remove(&schema, id, &fields);
            debug!(model = schema.name(), record = id.as_u64(), "staged delete");
            self.journal.push(StagedOp::Deleted {
                model: schema.name().to_string(),
                id,
                fields,
            });
        }
        Ok(count)
    }

    /// Applies `changes` to every record of `model` matching `predicate`.
    /// Returns the number of records updated.
    pub fn update_where(&mut self, model: &str, predicate: &Predicate, changes: &Fields) -> CoreResult<u64> {
        let ids = crate::query::matching_ids(self, model, predicate, View::Staged)?;
        let mark = self.journal.len();
        let mut result = Ok(0);
        for id in ids {
            if let Err(e) = self.update(model, id, changes.clone()) {
                result = Err(e);
                break;
            }
            result = result.map(|n| n + 1);
        }
        self.poison_if_partial(&result, mark);
        result
    }

    /// Deletes every record of `model` matching `predicate`, applying
    /// delete policies. Returns the number of records deleted, cascades
    /// included.
    pub fn delete_where(&mut self, model: &str, predicate: &Predicate) -> CoreResult<u64> {
        let ids = crate::query::matching_ids(self, model, predicate, View::Staged)?;
        let mark = self.journal.len();
        let mut result = Ok(0);
        for id in ids {
            // An earlier cascade may already have removed it.
            if self.chunks.locate(model, id, View::Staged).is_none() {
                continue;
            }
            match self.delete_inner(model, id) {
                Ok(n) => result = result.map(|total| total + n),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.poison_if_partial(&result, mark);
        result
    }

    fn poison_if_partial<T>(&mut self, result: &CoreResult<T>, mark: usize) {
        if result.is_err() && self.journal.len() > mark {
            self.poisoned = true;
        }
    }

    /// Fails if a unique field of the record collides with another record.
    /// With `only`, just those fields are checked. Null never collides.
    pub(crate) fn check_unique(
        &self,
        schema: &ModelSchema,
        id: RecordId,
        fields: &Fields,
        only: Option<&Fields>,
    ) -> CoreResult<()> {
        for field in schema.fields().iter().filter(|f| f.unique && !f.primary_key) {
            if only.is_some_and(|only| !only.contains_key(&field.name)) {
                continue;
            }
            let Some(value) = fields.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let holders = self.ids_matching(schema.name(), &field.name, value, View::Staged)?;
            if holders.iter().any(|other| *other != id) {
                return Err(CoreError::uniqueness(schema.name(), &field.name, value.to_string()));
            }
        }
        Ok(())
    }

    /// Fails if a non-null foreign key of the record has no target.
    pub(crate) fn check_foreign_keys(
        &self,
        schema: &ModelSchema,
        fields: &Fields,
        only: Option<&Fields>,
    ) -> CoreResult<()> {
        for field in schema.fields() {
            let Some((target_model, target_field)) = field.foreign_key_target() else {
                continue;
            };
            if only.is_some_and(|only| !only.contains_key(&field.name)) {
                continue;
            }
            let Some(value) = fields.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            if target_model == schema.name() && fields.get(target_field) == Some(value) {
                continue;
            }
            if self
                .ids_matching(target_model, target_field, value, View::Staged)?
                .is_empty()
            {
                return Err(CoreError::foreign_key(
                    schema.name(),
                    &field.name,
                    format!("no {target_model} with {target_field} = {value}"),
                ));
            }
        }
        Ok(())
    }

    /// Fails if an update changes a key that other records still reference.
    fn check_referenced_keys_unchanged(
        &self,
        schema: &ModelSchema,
        id: RecordId,
        old: &Fields,
        changed: &Fields,
    ) -> CoreResult<()> {
        for link in self.registry.referencing(schema.name()) {
            if !changed.contains_key(&link.target_field) {
                continue;
            }
            let Some(old_value) = old.get(&link.target_field) else {
                continue;
            };
            let referrers = self.ids_matching(&link.model, &link.field, old_value, View::Staged)?;
            let self_only = link.model == schema.name() && referrers.iter().all(|r| *r == id);
            if !referrers.is_empty() && !self_only {
                return Err(CoreError::foreign_key(
                    &link.model,
                    &link.field,
                    format!(
                        "{}.{} = {old_value} is still referenced and cannot change",
                        schema.name(),
                        link.target_field
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Fails if a deleted record's keys are still referenced and no live
    /// record holds the same key.
    pub(crate) fn check_unreferenced(&self, model: &str, fields: &Fields) -> CoreResult<()> {
        for link in self.registry.referencing(model) {
            let Some(value) = fields.get(&link.target_field).filter(|v| !v.is_null()) else {
                continue;
            };
            if !self
                .ids_matching(model, &link.target_field, value, View::Staged)?
                .is_empty()
            {
                continue;
            }
            if !self
                .ids_matching(&link.model, &link.field, value, View::Staged)?
                .is_empty()
            {
                return Err(CoreError::foreign_key(
                    &link.model,
                    &link.field,
                    format!("references deleted {model} with {} = {value}", link.target_field),
                ));
            }
        }
        Ok(())
    }
}

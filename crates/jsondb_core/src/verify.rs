//! Offline integrity checks of persisted state.
//!
//! Verification reads the catalog and every chunk file straight from the
//! backend and cross-checks them, without building a record store. Findings
//! are split into errors (data that cannot be trusted) and warnings
//! (inconsistencies repaired on open, or leftovers of a failed commit).

use crate::catalog::{Catalog, ChunkDirectory};
use crate::chunk::{Chunk, Fields};
use crate::dir::DatabaseDir;
use crate::error::CoreResult;
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::types::{ChunkId, RecordId};
use crate::value::{IndexKey, Value};
use jsondb_storage::{FileBackend, StorageBackend};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Models checked.
    pub models_checked: usize,
    /// Chunk files read.
    pub chunks_checked: usize,
    /// Records decoded.
    pub records_checked: u64,
    /// Problems that make stored data unreliable.
    pub errors: Vec<String>,
    /// Inconsistencies that do not lose data.
    pub warnings: Vec<String>,
}

impl VerifyReport {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Verifies the database in `path`, holding its lock for the duration.
pub fn verify_path(path: &Path) -> CoreResult<VerifyReport> {
    let dir = DatabaseDir::open(path, false)?;
    let backend = FileBackend::open(dir.path())?;
    verify_backend(&backend)
}

/// Verifies the catalog and chunk files stored in `backend`.
///
/// Fails only if the backend itself fails; every finding about the data is
/// collected in the report.
pub fn verify_backend(backend: &dyn StorageBackend) -> CoreResult<VerifyReport> {
    let mut report = VerifyReport::default();
    let catalog = match Catalog::load(backend) {
        Ok(Some(catalog)) => catalog,
        Ok(None) => {
            report.errors.push("catalog.json is missing".to_string());
            return Ok(report);
        }
        Err(e) if e.is_storage() => return Err(e),
        Err(e) => {
            report.errors.push(e.to_string());
            return Ok(report);
        }
    };

    let registry = match restore_registry(&catalog) {
        Ok(registry) => registry,
        Err(e) => {
            report.errors.push(format!("schema: {e}"));
            return Ok(report);
        }
    };
    for (name, _) in catalog.chunks.iter() {
        if registry.model(name).is_none() {
            report.errors.push(format!("chunk directory for unknown model {name}"));
        }
    }

    let mut models: Vec<ModelRecords> = Vec::new();
    let mut total = 0;
    for schema in registry.models() {
        let directory = catalog.chunks.get(schema.name()).cloned().unwrap_or_default();
        let records = check_model(backend, schema, &directory, &mut report)?;
        check_counters(&catalog, schema.name(), &records, &mut report);
        total += records.records.len() as u64;
        report.models_checked += 1;
        models.push(records);
    }
    if catalog.meta.total_records != total {
        report.warnings.push(format!(
            "catalog total_records is {}, chunks hold {total}",
            catalog.meta.total_records
        ));
    }

    check_unique(&models, &mut report);
    check_foreign_keys(&registry, &models, &mut report);

    info!(
        models = report.models_checked,
        chunks = report.chunks_checked,
        records = report.records_checked,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "verified database"
    );
    Ok(report)
}

fn restore_registry(catalog: &Catalog) -> CoreResult<SchemaRegistry> {
    let defs = catalog
        .schema
        .iter()
        .map(|(name, desc)| ModelSchema::def_from_descriptor(name, desc))
        .collect::<CoreResult<Vec<_>>>()?;
    SchemaRegistry::restore(defs)
}

/// Decoded records of one model.
struct ModelRecords {
    schema: Arc<ModelSchema>,
    records: Vec<(RecordId, Fields)>,
}

fn check_model(
    backend: &dyn StorageBackend,
    schema: &Arc<ModelSchema>,
    directory: &ChunkDirectory,
    report: &mut VerifyReport,
) -> CoreResult<ModelRecords> {
    let model = schema.name();
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    if directory.total_chunks != directory.chunks.len() as u64 {
        report.warnings.push(format!(
            "{model}: total_chunks is {}, directory lists {}",
            directory.total_chunks,
            directory.chunks.len()
        ));
    }
    if let Some(last) = directory.chunks.keys().next_back() {
        if directory.current_chunk != *last {
            report.warnings.push(format!(
                "{model}: current_chunk is {}, highest listed chunk is {last}",
                directory.current_chunk
            ));
        }
    }

    let ids: Vec<u64> = directory.chunks.keys().copied().collect();
    for (i, (id, key)) in directory.chunks.iter().enumerate() {
        let chunk_id = ChunkId::new(*id);
        let Some(data) = backend.read(key)? else {
            report.errors.push(format!("{model}: chunk file {key} is missing"));
            continue;
        };
        report.chunks_checked += 1;
        let chunk = match Chunk::decode(&data, schema, chunk_id) {
            Ok(chunk) => chunk,
            Err(e) => {
                report.errors.push(format!("{model}: {key}: {e}"));
                continue;
            }
        };

        let expected_next = ids.get(i + 1).copied().map(ChunkId::new);
        if chunk.next_chunk != expected_next {
            report.warnings.push(format!(
                "{model}: {key} links to {:?}, expected {:?}",
                chunk.next_chunk.map(ChunkId::as_u64),
                expected_next.map(ChunkId::as_u64)
            ));
        }
        for (record_id, fields) in chunk.records {
            report.records_checked += 1;
            if !seen.insert(record_id) {
                report
                    .errors
                    .push(format!("{model}: record {record_id} is stored in more than one chunk"));
                continue;
            }
            records.push((record_id, fields));
        }
        debug!(model, chunk = *id, "verified chunk");
    }

    let listed: HashSet<&str> = directory.chunks.values().map(String::as_str).collect();
    for key in backend.list(&format!("data/{model}/"))? {
        if !listed.contains(key.as_str()) {
            report
                .warnings
                .push(format!("{model}: unreferenced chunk file {key}"));
        }
    }

    Ok(ModelRecords {
        schema: Arc::clone(schema),
        records,
    })
}

fn check_counters(catalog: &Catalog, model: &str, records: &ModelRecords, report: &mut VerifyReport) {
    let counters = catalog.counters.get(model).copied().unwrap_or_default();
    let actual = records.records.len() as u64;
    if counters.total_records != actual {
        report.warnings.push(format!(
            "{model}: counter total_records is {}, chunks hold {actual}",
            counters.total_records
        ));
    }
    if let Some(max) = records.records.iter().map(|(id, _)| id.as_u64()).max() {
        if counters.next_id <= max {
            report.warnings.push(format!(
                "{model}: next_id {} does not exceed the highest id {max}",
                counters.next_id
            ));
        }
    }
}

fn check_unique(models: &[ModelRecords], report: &mut VerifyReport) {
    for entry in models {
        let model = entry.schema.name();
        for field in entry.schema.fields().iter().filter(|f| f.unique && !f.primary_key) {
            let mut owners: HashMap<IndexKey, RecordId> = HashMap::new();
            for (id, fields) in &entry.records {
                let value = fields.get(&field.name).unwrap_or(&Value::Null);
                if value.is_null() {
                    continue;
                }
                if let Some(first) = owners.insert(IndexKey::from(value), *id) {
                    report.errors.push(format!(
                        "{model}.{}: records {first} and {id} share the unique value {value}",
                        field.name
                    ));
                }
            }
        }
    }
}

fn check_foreign_keys(registry: &SchemaRegistry, models: &[ModelRecords], report: &mut VerifyReport) {
    let by_name: HashMap<&str, &ModelRecords> =
        models.iter().map(|m| (m.schema.name(), m)).collect();
    let mut targets: HashMap<(&str, &str), HashSet<IndexKey>> = HashMap::new();

    for entry in models {
        let model = entry.schema.name();
        for field in entry.schema.fields() {
            let Some((target_model, target_field)) = field.foreign_key_target() else {
                continue;
            };
            if registry.model(target_model).is_none() {
                continue;
            }
            let keys = targets.entry((target_model, target_field)).or_insert_with(|| {
                by_name
                    .get(target_model)
                    .map(|target| {
                        target
                            .records
                            .iter()
                            .filter_map(|(_, fields)| fields.get(target_field))
                            .filter(|v| !v.is_null())
                            .map(IndexKey::from)
                            .collect()
                    })
                    .unwrap_or_default()
            });
            for (id, fields) in &entry.records {
                let Some(value) = fields.get(&field.name).filter(|v| !v.is_null()) else {
                    continue;
                };
                if !keys.contains(&IndexKey::from(value)) {
                    report.errors.push(format!(
                        "{model}.{}: record {id} references missing {target_model}.{target_field} {value}",
                        field.name
                    ));
                }
            }
        }
    }
}

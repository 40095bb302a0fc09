//! Inspect command implementation.

use super::open_existing;
use jsondb_core::schema::ModelDescriptor;
use jsondb_core::DatabaseStats;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Statistics of the committed state.
    pub stats: DatabaseStats,
    /// Model definitions (if requested), foreign key targets first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<(String, ModelDescriptor)>>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_models: bool,
    format: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Inspecting database at {:?}", path);
    let db = open_existing(path)?;
    let schema = show_models.then(|| {
        db.export_schema()
            .into_iter()
            .map(|m| {
                let descriptor = m.descriptor();
                (m.model, descriptor)
            })
            .collect()
    });
    let result = InspectResult {
        path: path.display().to_string(),
        stats: db.stats(),
        schema,
    };
    db.close()?;

    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?,
        _ => print_text_output(&result, out)?,
    }
    Ok(())
}

fn print_text_output(result: &InspectResult, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "JsonDB Database Inspection")?;
    writeln!(out, "==========================")?;
    writeln!(out)?;
    writeln!(out, "Path: {}", result.path)?;
    writeln!(out, "Chunk size: {}", result.stats.chunk_size)?;
    writeln!(out, "Total records: {}", result.stats.total_records)?;
    writeln!(out)?;
    writeln!(out, "Models:")?;
    for model in &result.stats.models {
        writeln!(
            out,
            "  {} (v{}): {} records in {} chunks, next id {}",
            model.name, model.version, model.records, model.chunks, model.next_id
        )?;
    }

    if let Some(schema) = &result.schema {
        writeln!(out)?;
        writeln!(out, "Schema:")?;
        for (name, model) in schema {
            writeln!(out, "  {name}")?;
            for (field, desc) in model.fields.iter() {
                write!(out, "    {field}: {}", desc.kind)?;
                if desc.primary_key {
                    write!(out, " primary key")?;
                }
                if desc.unique {
                    write!(out, " unique")?;
                }
                if desc.index {
                    write!(out, " indexed")?;
                }
                if let Some(target) = &desc.foreign_key {
                    write!(out, " -> {target}")?;
                }
                writeln!(out)?;
            }
            for (rel, desc) in model.relationships.iter() {
                writeln!(out, "    {rel}: {} {}", desc.kind, desc.model)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::seed;
    use tempfile::tempdir;

    #[test]
    fn text_output_lists_models() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let mut out = Vec::new();
        run(dir.path(), true, "text", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("User (v1): 3 records in 2 chunks, next id 4"));
        assert!(text.contains("author_id: integer -> User.id"));
        assert!(text.contains("posts: one_to_many Post"));
    }

    #[test]
    fn json_output_parses() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let mut out = Vec::new();
        run(dir.path(), false, "json", &mut out).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["stats"]["total_records"], 4);
        assert!(parsed.get("schema").is_none());
    }

    #[test]
    fn missing_database_is_an_error() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        assert!(run(&dir.path().join("nope"), false, "text", &mut out).is_err());
    }
}

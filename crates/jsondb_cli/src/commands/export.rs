//! Export command implementation.
//!
//! Writes one JSON object per line: a `schema` line per model, followed by a
//! `record` line per committed record unless only the schema is requested.

use super::open_existing;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Runs the export command.
pub fn run(
    path: &Path,
    model: Option<&str>,
    schema_only: bool,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Exporting database at {:?}", path);
    let db = open_existing(path)?;
    let models: Vec<_> = db
        .export_schema()
        .into_iter()
        .filter(|m| model.map_or(true, |name| m.model == name))
        .collect();
    if let Some(name) = model {
        if models.is_empty() {
            return Err(format!("Unknown model {name}").into());
        }
    }

    for export in &models {
        let line = json!({
            "kind": "schema",
            "model": export.model,
            "definition": export.descriptor(),
        });
        writeln!(out, "{line}")?;
    }

    if !schema_only {
        for export in &models {
            for record in db.export_records(&export.model)? {
                let line = json!({
                    "kind": "record",
                    "model": export.model,
                    "data": record?.to_json(),
                });
                writeln!(out, "{line}")?;
            }
        }
    }

    db.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::seed;
    use tempfile::tempdir;

    fn lines(out: &[u8]) -> Vec<serde_json::Value> {
        out.split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_slice(l).unwrap())
            .collect()
    }

    #[test]
    fn schema_lines_precede_records() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let mut out = Vec::new();
        run(dir.path(), None, false, &mut out).unwrap();
        let lines = lines(&out);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0]["model"], "User");
        assert_eq!(lines[1]["model"], "Post");
        assert_eq!(lines[2]["kind"], "record");
        assert_eq!(lines[2]["data"]["name"], "ann");
        assert_eq!(lines[5]["data"]["title"], "hello");
    }

    #[test]
    fn single_model_schema_only() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let mut out = Vec::new();
        run(dir.path(), Some("Post"), true, &mut out).unwrap();
        let lines = lines(&out);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0]["definition"]["fields"]["author_id"]["foreign_key"],
            "User.id"
        );
    }

    #[test]
    fn unknown_model_is_an_error() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let mut out = Vec::new();
        assert!(run(dir.path(), Some("Nope"), false, &mut out).is_err());
    }
}

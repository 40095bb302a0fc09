//! Verify command implementation.

use jsondb_core::{verify_path, VerifyReport};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Runs the verify command.
pub fn run(
    path: &Path,
    strict: bool,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(out, "Verifying database at {}", path.display())?;
    writeln!(out)?;

    info!("Verifying database at {:?}", path);
    let report = verify_path(path)?;
    if !report.is_ok() {
        warn!(errors = report.errors.len(), "verification found errors");
    }
    print_report(&report, out)?;

    writeln!(out)?;
    if report.is_ok() && !(strict && !report.warnings.is_empty()) {
        writeln!(out, "✓ Database verification passed")?;
        Ok(())
    } else {
        writeln!(out, "✗ Database verification failed")?;
        Err("Verification failed".into())
    }
}

fn print_report(report: &VerifyReport, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        out,
        "  models checked: {}, chunks: {}, records: {}",
        report.models_checked, report.chunks_checked, report.records_checked
    )?;
    for error in &report.errors {
        writeln!(out, "    ERROR: {error}")?;
    }
    for warning in &report.warnings {
        writeln!(out, "    WARNING: {warning}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::seed;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn clean_database_passes() {
        let dir = tempdir().unwrap();
        seed(dir.path());

        let mut out = Vec::new();
        run(dir.path(), true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("models checked: 2, chunks: 3, records: 4"));
        assert!(text.contains("passed"));
    }

    #[test]
    fn missing_chunk_fails() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        fs::remove_file(dir.path().join("data/User/chunk_1.json")).unwrap();

        let mut out = Vec::new();
        assert!(run(dir.path(), false, &mut out).is_err());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ERROR"));
    }

    #[test]
    fn strict_mode_fails_on_warnings() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        fs::write(dir.path().join("data/User/chunk_9.json"), "{}").unwrap();

        let mut out = Vec::new();
        run(dir.path(), false, &mut out).unwrap();
        let mut out = Vec::new();
        assert!(run(dir.path(), true, &mut out).is_err());
    }
}

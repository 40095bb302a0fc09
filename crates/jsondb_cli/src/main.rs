//! JsonDB CLI
//!
//! Command-line tools for JsonDB database directories.
//!
//! # Commands
//!
//! - `inspect` - Display models, record counts and chunk figures
//! - `verify` - Check the catalog and chunk files for consistency
//! - `export` - Write schema and records as JSON lines
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// JsonDB command-line database tools.
#[derive(Parser)]
#[command(name = "jsondb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display database statistics and model metadata
    Inspect {
        /// Show field and relationship definitions
        #[arg(short, long)]
        models: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify database integrity
    Verify {
        /// Fail on warnings as well as errors
        #[arg(short, long)]
        strict: bool,
    },

    /// Export schema and records as JSON lines
    Export {
        /// Export only this model
        #[arg(short, long)]
        model: Option<String>,

        /// Export the schema without records
        #[arg(long)]
        schema_only: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { models, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            let mut out = std::io::stdout().lock();
            commands::inspect::run(&path, models, &format, &mut out)?;
        }
        Commands::Verify { strict } => {
            let path = cli.path.ok_or("Database path required for verify")?;
            let mut out = std::io::stdout().lock();
            commands::verify::run(&path, strict, &mut out)?;
        }
        Commands::Export { model, schema_only } => {
            let path = cli.path.ok_or("Database path required for export")?;
            let mut out = std::io::stdout().lock();
            commands::export::run(&path, model.as_deref(), schema_only, &mut out)?;
        }
        Commands::Version => {
            println!("JsonDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("JsonDB Core v{}", jsondb_core::VERSION);
        }
    }

    Ok(())
}

//! refgraph CLI
//!
//! Command-line tools for refgraph stores.
//!
//! # Commands
//!
//! - `inspect` - Display table counts, roots and per-type node counts
//! - `verify` - Check ref counts, references and relationship indices
//! - `migrate` - Bring an older relational store up to date
//! - `dump` - Print a relational store as SQL
//! - `export` - Write a store as a CBOR snapshot
//!
//! Paths ending in `.cbor` are read as snapshots; anything else is opened as
//! a SQLite store.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// refgraph store tools.
#[derive(Parser)]
#[command(name = "refgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
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
    /// Display store statistics
    Inspect {
        /// Also print the full content of this node
        #[arg(short, long)]
        node: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store integrity
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the additive schema migration
    Migrate {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Print the store as a SQL script
    Dump {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the store as a CBOR node-map snapshot
    Export {
        /// Snapshot file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { node, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, node.as_deref(), &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Migrate { dry_run } => {
            let path = cli.path.ok_or("Store path required for migrate")?;
            commands::migrate::run(&path, dry_run)?;
        }
        Commands::Dump { output } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, output.as_deref())?;
        }
        Commands::Export { output } => {
            let path = cli.path.ok_or("Store path required for export")?;
            commands::export::run(&path, &output)?;
        }
        Commands::Version => {
            println!("refgraph CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("refgraph core v{}", refgraph_core::VERSION);
        }
    }

    Ok(())
}

//! docwal CLI
//!
//! Command-line tools for docwal WAL directories. Commands open logfiles
//! read-only and never take the directory lock, so a directory in use by a
//! running manager can be inspected, though its open logfile may still grow.
//!
//! # Commands
//!
//! - `inspect` - Display logfiles and the persisted shutdown state
//! - `verify` - Check every marker of every logfile
//! - `dump` - Dump the markers of one logfile for debugging
//! - `config` - Validate a JSON configuration file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docwal write-ahead log tools.
#[derive(Parser)]
#[command(name = "docwal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the WAL directory
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
    /// Display logfiles and the persisted shutdown state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify the checksum and framing of every marker
    Verify,

    /// Dump the markers of a logfile
    Dump {
        /// Logfile id
        #[arg(short, long)]
        logfile: u64,

        /// Maximum number of markers to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a JSON configuration file and print the resulting properties
    Config {
        /// Configuration file
        file: PathBuf,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("WAL path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("WAL path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            logfile,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("WAL path required for dump")?;
            commands::dump::run(&path, logfile, limit, &format)?;
        }
        Commands::Config { file } => {
            commands::config::run(&file)?;
        }
        Commands::Version => {
            println!("docwal CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

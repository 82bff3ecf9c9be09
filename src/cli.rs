//! CLI argument parsing for the rutero-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "rutero-worker", about = "Rutero school transport planning worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a schedule file locally and against the routing service
    Validate {
        /// Schedule file (snapshot or raw optimizer output)
        #[arg(long)]
        schedule: PathBuf,
        /// Day the schedule belongs to (defaults to the file's day)
        #[arg(long)]
        day: Option<String>,
        /// Ask the validation service to persist the report
        #[arg(long)]
        persist: bool,
        /// Reassign critical incidents automatically after validation
        #[arg(long)]
        reassign: bool,
    },
    /// Run the critical reassignment pass on a schedule file
    Reassign {
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        day: Option<String>,
        /// Write the resulting schedule snapshot here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Export validation incidents as CSV or JSON
    ExportIncidents {
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        day: Option<String>,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Normalize a raw imported schedule file into canonical form
    Normalize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List saved schedule snapshots
    Snapshots,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

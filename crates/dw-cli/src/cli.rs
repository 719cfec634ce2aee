//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::evaluate::EvaluateArgs;

/// Duplicate-event watchdog.
///
/// Reads the monitor timeline of a test run and reports events that repeated
/// pathologically often, one verdict per namespace.
#[derive(Debug, Parser)]
#[command(name = "dw", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Evaluate a timeline and print one JSON verdict per line.
    Evaluate(EvaluateArgs),

    /// Show the platform and topology of the configured cluster.
    ClusterInfo,
}

//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Provisio - declarative resource reconciliation.
#[derive(Parser, Debug)]
#[command(name = "provisio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack file.
    #[arg(short, long, global = true, env = "PROVISIO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "PROVISIO_LOG_JSON")]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the stack file.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what an apply would change.
    Plan {
        /// Show the properties behind each change.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Reconcile every declared resource.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Delete protected resources too.
        #[arg(long)]
        force: bool,
    },

    /// Inspect and repair recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },

    /// List registered resource types.
    Providers,
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// List recorded resources.
    List,

    /// Show the record of one resource.
    Show {
        /// Logical resource name.
        name: String,

        /// Resource type, required when the name is ambiguous.
        #[arg(long = "type")]
        type_name: Option<String>,
    },

    /// Forget a resource without deleting it.
    Rm {
        /// Logical resource name.
        name: String,

        /// Resource type, required when the name is ambiguous.
        #[arg(long = "type")]
        type_name: Option<String>,
    },

    /// Release the stack lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Release whatever lock is held.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

//! CLI module for the provisio tool.
//!
//! This module provides the command-line interface for validating, planning,
//! applying and destroying stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;

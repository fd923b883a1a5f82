//! CLI module for the Converge engine.
//!
//! This module provides the command-line interface for planning, applying
//! and inspecting infrastructure state.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;

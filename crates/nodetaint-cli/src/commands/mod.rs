//! CLI command implementations

pub mod config;
pub mod dot;
pub mod triage;

pub use config::ConfigArgs;
pub use dot::DotArgs;
pub use triage::TriageArgs;

use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use nodetaint_core::PathExport;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the configuration a run would use
    Config(ConfigArgs),

    /// Summarize a JSON taint path export
    Triage(TriageArgs),

    /// Render a JSON taint path export as a Graphviz graph
    Dot(DotArgs),
}

/// Reads a JSON export written by the engine.
pub(crate) fn read_export(path: &Path) -> anyhow::Result<PathExport> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read taint export '{}'", path.display()))?;
    PathExport::from_json(&json)
        .with_context(|| format!("Invalid taint export '{}'", path.display()))
}

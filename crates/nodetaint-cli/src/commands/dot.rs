//! Dot command - renders a JSON taint path export as Graphviz

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::read_export;

#[derive(Args, Debug)]
pub struct DotArgs {
    /// JSON export written by the engine
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Write the graph to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl DotArgs {
    pub fn run(&self) -> Result<()> {
        let dot = self.render()?;
        match &self.output {
            Some(path) => {
                fs::write(path, &dot)
                    .with_context(|| format!("Failed to write '{}'", path.display()))?;
                eprintln!("{} {}", "wrote".green().bold(), path.display());
            }
            None => print!("{dot}"),
        }
        Ok(())
    }

    fn render(&self) -> Result<String> {
        Ok(read_export(&self.path)?.to_dot())
    }
}

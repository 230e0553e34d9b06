//! Triage command - summarizes a JSON taint path export

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use nodetaint_core::TriageReport;
use nodetaint_core::provenance::SanitizerClass;

use super::read_export;
use crate::output::json::JsonFormatter;

const SANITIZER_CLASSES: [SanitizerClass; 3] = [
    SanitizerClass::Implicit,
    SanitizerClass::Explicit,
    SanitizerClass::ObjectAccess,
];

#[derive(Args, Debug)]
pub struct TriageArgs {
    /// JSON export written by the engine (taint.json or taint_<n>.json)
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl TriageArgs {
    pub fn run(&self) -> Result<()> {
        self.configure_colors();
        let export = read_export(&self.path)?;
        let report = TriageReport::from_export(&export);

        match self.format.as_str() {
            "json" => println!(
                "{}",
                JsonFormatter::new().format_triage(&report, &self.path.to_string_lossy())
            ),
            _ => print_text(&report),
        }
        Ok(())
    }

    fn configure_colors(&self) {
        let no_color_env = std::env::var("NO_COLOR").is_ok();
        if self.no_color || no_color_env {
            colored::control::set_override(false);
        }
    }
}

fn print_text(report: &TriageReport) {
    println!();
    println!("{} {}", "Root:".bold(), report.root_operation);
    let sink = match report.sink {
        Some(class) => class.as_str().to_uppercase().red().bold(),
        None => "none".dimmed(),
    };
    println!("{} {}", "Sink class:".bold(), sink);
    println!(
        "{} {} nodes, longest path {}",
        "Graph:".bold(),
        report.count_nodes,
        report.longest_path
    );
    println!("{} {}", "Leaves:".bold(), join_ids(&report.leaf_ids));
    println!(
        "{} {}",
        "Controllable leaves:".bold(),
        join_ids(&report.controllable_leaf_ids)
    );

    println!();
    println!("{}", "Sanitizer-like operations:".bold());
    for class in SANITIZER_CLASSES {
        let summary = report.sanitizers(class);
        let operations: Vec<&str> = summary.operations.iter().map(String::as_str).collect();
        println!(
            "  {:<14} {} {}",
            class.as_str().cyan(),
            summary.count,
            operations.join(", ").dimmed()
        );
    }
    println!();
}

fn join_ids(ids: &[u32]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
    ids.join(", ")
}

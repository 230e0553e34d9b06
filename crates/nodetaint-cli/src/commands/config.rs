//! Config command - prints the configuration a run would resolve

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use nodetaint_core::Config;
use nodetaint_core::config::{find_config_file, load_config_with_warnings};
use nodetaint_core::policy::{KNOWN_KINDS, ValueKind};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// `key=value` tokens applied after the config file, as passed to the engine
    #[arg(long, num_args = 1.., value_name = "TOKEN")]
    pub tokens: Vec<String>,

    /// Directory to search for nodetaint.toml (defaults to the current directory)
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

/// The resolved configuration plus the policy each known kind ends up with.
#[derive(Debug, Serialize)]
pub struct ResolvedConfig {
    pub file: Option<PathBuf>,
    pub config: Config,
    pub policies: Vec<ResolvedPolicy>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub kind: &'static str,
    pub precision: &'static str,
    pub policy: &'static str,
}

impl ConfigArgs {
    pub fn run(&self) -> Result<()> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };
        let resolved = resolve(&dir, &self.tokens)?;
        for warning in &resolved.warnings {
            eprintln!("{} {}", "warning:".yellow().bold(), warning);
        }

        match self.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&resolved)?),
            _ => print_text(&resolved),
        }
        Ok(())
    }
}

/// Loads the nearest config file above `dir` and applies `tokens` on top of it.
pub fn resolve(dir: &Path, tokens: &[String]) -> Result<ResolvedConfig> {
    let file = find_config_file(dir);
    let (mut config, warnings) = match &file {
        Some(path) => {
            let loaded = load_config_with_warnings(path)?;
            (loaded.config, loaded.warnings)
        }
        None => (Config::default(), Vec::new()),
    };
    config.apply_tokens(tokens);

    let registry = config.policy_registry();
    let policies = KNOWN_KINDS
        .iter()
        .map(|&kind| {
            let value_kind = ValueKind::from_name(kind);
            ResolvedPolicy {
                kind,
                precision: registry.precision(&value_kind).as_str(),
                policy: registry.resolve(&value_kind).as_str(),
            }
        })
        .collect();

    Ok(ResolvedConfig {
        file,
        config,
        policies,
        warnings,
    })
}

fn print_text(resolved: &ResolvedConfig) {
    let config = &resolved.config;
    println!();
    match &resolved.file {
        Some(path) => println!("{} {}", "Config file:".bold(), path.display()),
        None => println!("{} {}", "Config file:".bold(), "none (defaults)".dimmed()),
    }
    println!();
    print_flag("eval_sink", config.eval_sink);
    print_flag("assert_passed", config.assert_passed);
    print_flag("taint_paths", config.taint_paths);
    print_flag("taint_paths_json", config.taint_paths_json);
    print_flag("aggressive_sink_propagation", config.aggressive_sink_propagation);
    print_flag("sink_report", config.sink_report);
    print_flag("log_level.explain", config.log_level.explain);
    print_flag("log_level.debug", config.log_level.debug);
    println!("  {}: {}", "max_length".cyan(), config.max_length);
    println!(
        "  {}: {}",
        "output_dir".cyan(),
        config.output_dir().display()
    );

    println!();
    println!("{}", "Policies:".bold());
    for policy in &resolved.policies {
        println!(
            "  {:<8} {:<10} {}",
            policy.kind.cyan(),
            policy.precision,
            policy.policy
        );
    }
    println!();
}

fn print_flag(name: &str, value: bool) {
    let rendered = if value {
        "on".green()
    } else {
        "off".red()
    };
    println!("  {}: {}", name.cyan(), rendered);
}

//! nodetaint CLI - inspects configurations and provenance exports of the taint engine
//!
//! The engine itself runs inside an instrumentation host; this binary works on what it leaves
//! behind.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use commands::Commands;
use nodetaint_core::logging::{LogOptions, init_logging};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "nodetaint",
    author,
    version,
    about = "Inspect nodetaint configurations and taint path exports",
    long_about = "nodetaint tracks untrusted data through instrumented JavaScript executions.\n\n\
                  This tool resolves run configurations, triages exported taint paths and\n\
                  renders them as Graphviz graphs."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_enum, default_value = "warn", global = true, help = "Set the log level")]
    pub log_level: LogLevel,

    #[arg(long, global = true, help = "Write logs to the specified file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub log_json: bool,
}

impl Cli {
    fn log_options(&self) -> LogOptions {
        LogOptions {
            level: self.log_level.as_tracing_level(),
            file: self.log_file.clone(),
            json: self.log_json,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_options());

    match cli.command {
        Commands::Config(args) => args.run(),
        Commands::Triage(args) => args.run(),
        Commands::Dot(args) => args.run(),
    }
}

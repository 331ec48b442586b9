// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `monoflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "monoflow",
    version,
    about = "Run a pipeline of steps over every package of a monorepo, skipping unchanged work.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Monoflow.toml` in the repo root.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Repository root.
    #[arg(long, value_name = "PATH", default_value = ".")]
    pub repo: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `MONOFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Discover and hash packages, print the plan, but don't run any step.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the full flow report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

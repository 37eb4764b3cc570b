//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::commands::config::ConfigArgs;
use crate::cli::commands::demo::DemoArgs;

#[derive(Parser)]
#[command(name = "rowcache")]
#[command(about = "Rowcache - cached row sets replayed into running pipelines", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .rowcache/config.yaml merged with local.yaml)
    #[arg(short, long, global = true, env = "ROWCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cache a synthetic computation and replay it into local pipelines
    Demo(DemoArgs),

    /// Configuration commands
    Config(ConfigArgs),
}

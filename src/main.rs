//! Rowcache CLI entry point.

use anyhow::Result;
use clap::Parser;

use rowcache::cli::{Cli, Commands};
use rowcache::infrastructure::logging::LoggerImpl;
use rowcache::{Config, ConfigLoader};

fn load_config(cli: &Cli) -> Result<Config> {
    match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => rowcache::cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => rowcache::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Demo(args) => rowcache::cli::commands::demo::execute(args, &config, cli.json).await,
        Commands::Config(args) => rowcache::cli::commands::config::execute(args, &config, cli.json),
    };

    if let Err(err) = result {
        rowcache::cli::handle_error(err, cli.json);
    }
}

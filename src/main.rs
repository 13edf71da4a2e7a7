//! dircache - shared, file-locked directory caches
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use dircache::cli::args::{ConfigAction, ConfigArgs};
use dircache::cli::{Cli, Commands};
use dircache::config::{Config, ConfigManager};
use dircache::error::DirCacheResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> DirCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    // Init rewrites the file, so it must not depend on it parsing
    let config = match cli.command {
        Commands::Config(ConfigArgs {
            action: Some(ConfigAction::Init { .. }),
        }) => Config::default(),
        _ => config_manager.load()?,
    };

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Info(args) => dircache::cli::commands::info(args, &config),
        Commands::Put(args) => dircache::cli::commands::put(args, &config),
        Commands::Get(args) => dircache::cli::commands::get(args, &config),
        Commands::Config(args) => {
            dircache::cli::commands::config(args, &config_manager, &config)
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug. `general.verbose` counts as one -v.
fn init_logging(verbose: u8, config: &Config) {
    let level = verbose.max(u8::from(config.general.verbose));
    let filter = match level {
        0 => EnvFilter::new("dircache=warn"),
        1 => EnvFilter::new("dircache=info"),
        _ => EnvFilter::new("dircache=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

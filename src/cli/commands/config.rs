//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::DirCacheResult;
use console::style;

/// Execute the config command
pub fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> DirCacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force)?,
    }

    Ok(())
}

fn show_config(config: &Config) -> DirCacheResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

fn init_config(manager: &ConfigManager, force: bool) -> DirCacheResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        println!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        println!("  {}", style("Use --force to overwrite").dim());
        return Ok(());
    }

    manager.save(&Config::default())?;
    println!(
        "{} Configuration initialized at {}",
        style("✓").green(),
        path.display()
    );

    Ok(())
}

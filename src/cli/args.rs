//! CLI argument definitions using clap derive

use crate::cache::LockMode;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// dircache - inspect and edit shared directory caches
///
/// Opens caches through the same registry library callers use, so lock
/// modes and properties behave exactly as they do in-process.
#[derive(Parser, Debug)]
#[command(name = "dircache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DIRCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show what a cache directory contains
    Info(InfoArgs),

    /// Store an entry in an indexed cache
    Put(PutArgs),

    /// Print an entry from an indexed cache
    Get(GetArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// How to locate and open a cache
#[derive(Args, Debug, Clone)]
pub struct OpenArgs {
    /// Cache name, resolved under the configured cache root
    pub name: String,

    /// Cache directory to use instead of <root>/<name>
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Lock mode (defaults to cache.lock_mode from config)
    #[arg(long, value_enum)]
    pub lock_mode: Option<LockModeArg>,

    /// Cache property (KEY=VALUE), may be repeated
    #[arg(short, long = "property", value_parser = parse_key_value)]
    pub properties: Vec<(String, String)>,

    /// Discard the cache contents when opening
    #[arg(long)]
    pub rebuild: bool,
}

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    /// Open the directory as a store (no properties, no validation)
    #[arg(long, conflicts_with_all = ["properties", "rebuild"])]
    pub store: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the put command
#[derive(Args, Debug)]
pub struct PutArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    /// Indexed cache name
    pub index: String,

    /// Entry key
    pub key: String,

    /// Entry value
    pub value: String,
}

/// Arguments for the get command
#[derive(Args, Debug)]
pub struct GetArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    /// Indexed cache name
    pub index: String,

    /// Entry key
    pub key: String,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Lock mode as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LockModeArg {
    /// Lock exclusively, only while the cache is in use
    None,
    /// Shared lock while open
    Shared,
    /// Exclusive lock while open
    Exclusive,
}

impl From<LockModeArg> for LockMode {
    fn from(arg: LockModeArg) -> Self {
        match arg {
            LockModeArg::None => LockMode::None,
            LockModeArg::Shared => LockMode::Shared,
            LockModeArg::Exclusive => LockMode::Exclusive,
        }
    }
}

/// Output format for the info command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Parse a property in KEY=VALUE format
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

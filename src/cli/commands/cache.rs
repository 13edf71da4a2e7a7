//! Cache commands - inspect and edit cache directories

use crate::cache::indexed::INDEX_EXTENSION;
use crate::cache::{CacheMarker, CacheUsage, IndexedCacheParameters, LockMode, LockOptions};
use crate::cli::args::{GetArgs, InfoArgs, OpenArgs, OutputFormat, PutArgs};
use crate::config::Config;
use crate::error::{DirCacheError, DirCacheResult};
use crate::registry::{CacheFactory, CacheLease, CacheRegistry, CacheRequest, StoreRequest};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What `info` reports about a cache directory
#[derive(Debug, Serialize)]
struct CacheInfo {
    name: String,
    dir: PathBuf,
    lock_mode: LockMode,
    initialized_at: Option<DateTime<Utc>>,
    indexes: Vec<String>,
}

/// Execute the info command
pub fn info(args: InfoArgs, config: &Config) -> DirCacheResult<()> {
    let options = lock_options(&args.open, config);

    let open = |factory: &CacheFactory| {
        if args.store {
            let request = StoreRequest::new(cache_dir(&args.open, config)).lock_options(options);
            factory.open_store(request)
        } else {
            factory.open(cache_request(&args.open, config))
        }
    };

    with_lease(&args.open, config, open, |lease| {
        let info = lease.use_cache("inspect cache", || inspect(lease, options.mode))?;
        match args.format {
            OutputFormat::Text => print_info(&info),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        }
        Ok(())
    })
}

/// Execute the put command
pub fn put(args: PutArgs, config: &Config) -> DirCacheResult<()> {
    let open = |factory: &CacheFactory| factory.open(cache_request(&args.open, config));

    with_lease(&args.open, config, open, |lease| {
        lease.use_cache("put entry", || {
            let index = lease.create_cache(IndexedCacheParameters::new(&args.index))?;
            index.put(&args.key, &args.value)
        })?;
        debug!("Stored {} in {}/{}", args.key, lease, args.index);
        Ok(())
    })
}

/// Execute the get command
pub fn get(args: GetArgs, config: &Config) -> DirCacheResult<()> {
    let open = |factory: &CacheFactory| factory.open(cache_request(&args.open, config));

    with_lease(&args.open, config, open, |lease| {
        let value: Option<serde_json::Value> = lease.use_cache("get entry", || {
            let index = lease.create_cache(IndexedCacheParameters::new(&args.index))?;
            index.get(&args.key)
        })?;

        match value {
            Some(serde_json::Value::String(s)) => println!("{}", s),
            Some(other) => println!("{}", other),
            None => {
                return Err(DirCacheError::User(format!(
                    "No entry '{}' in index '{}'",
                    args.key, args.index
                )))
            }
        }
        Ok(())
    })
}

/// Open a lease in a fresh session, run `body`, then close everything.
///
/// Close failures are only reported when `body` succeeded.
fn with_lease<O, B>(open_args: &OpenArgs, config: &Config, open: O, body: B) -> DirCacheResult<()>
where
    O: FnOnce(&CacheFactory) -> DirCacheResult<CacheLease>,
    B: FnOnce(&CacheLease) -> DirCacheResult<()>,
{
    let registry = CacheRegistry::with_defaults();
    let factory = registry.create();
    debug!(
        "Opening {} in session {}",
        cache_dir(open_args, config).display(),
        factory.id()
    );

    let outcome = open(&factory).and_then(|lease| body(&lease));
    let closed = factory.close().and(registry.close());
    outcome.and(closed)
}

/// Directory of the named cache: `--dir` if given, else `<root>/<name>`
fn cache_dir(args: &OpenArgs, config: &Config) -> PathBuf {
    args.dir
        .clone()
        .unwrap_or_else(|| config.cache.root_dir().join(&args.name))
}

fn lock_options(args: &OpenArgs, config: &Config) -> LockOptions {
    let options = config.cache.lock_options();
    match args.lock_mode {
        Some(mode) => options.with_mode(mode.into()),
        None => options,
    }
}

fn cache_request(args: &OpenArgs, config: &Config) -> CacheRequest {
    let usage = if args.rebuild {
        CacheUsage::Rebuild
    } else {
        CacheUsage::Normal
    };

    args.properties.iter().fold(
        CacheRequest::new(cache_dir(args, config))
            .display_name(&args.name)
            .usage(usage)
            .lock_options(lock_options(args, config)),
        |request, (key, value)| request.property(key, value.as_str()),
    )
}

fn inspect(lease: &CacheLease, lock_mode: LockMode) -> DirCacheResult<CacheInfo> {
    let dir = lease.base_dir();
    Ok(CacheInfo {
        name: lease.display_name().to_string(),
        dir: dir.to_path_buf(),
        lock_mode,
        initialized_at: CacheMarker::read(dir).map(|marker| marker.initialized_at),
        indexes: list_indexes(dir)?,
    })
}

fn list_indexes(dir: &Path) -> DirCacheResult<Vec<String>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DirCacheError::io(format!("listing {}", dir.display()), e))?;

    let mut indexes: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == INDEX_EXTENSION))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    indexes.sort();
    Ok(indexes)
}

fn print_info(info: &CacheInfo) {
    println!("{}", style(&info.name).bold());
    println!("  {:<14} {}", "Directory:", info.dir.display());
    println!("  {:<14} {}", "Lock mode:", info.lock_mode);

    let initialized = match info.initialized_at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => style("never").dim().to_string(),
    };
    println!("  {:<14} {}", "Initialized:", initialized);

    if info.indexes.is_empty() {
        println!("  {:<14} {}", "Indexes:", style("none").dim());
    } else {
        println!("  {:<14} {}", "Indexes:", info.indexes.join(", "));
    }
}

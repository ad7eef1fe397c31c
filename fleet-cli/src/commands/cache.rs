//! `fleet cache`: execution cache maintenance.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use fleet_exec::{DiskCache, ExecutionCache};

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the cache directory.
    Path(CacheArgs),

    /// Remove every cached step result.
    Clear(CacheArgs),
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache directory; defaults to the platform cache dir plus `fleet`.
    #[arg(long, env = "FLEET_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl CacheArgs {
    fn resolve(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir(),
        }
    }
}

/// `<platform cache dir>/fleet`
pub fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("could not determine cache directory")?;
    Ok(base.join("fleet"))
}

pub fn run(command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Path(args) => {
            println!("{}", args.resolve()?.display());
            Ok(())
        }
        CacheCommand::Clear(args) => {
            let dir = args.resolve()?;
            let removed = DiskCache::new(&dir)
                .clear()
                .with_context(|| format!("failed to clear cache at {}", dir.display()))?;
            tracing::debug!(dir = %dir.display(), removed, "cache cleared");
            println!(
                "{} removed {removed} cache {} from {}",
                "✓".green(),
                if removed == 1 { "entry" } else { "entries" },
                dir.display()
            );
            Ok(())
        }
    }
}

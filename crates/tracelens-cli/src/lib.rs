mod args;
mod render;

pub use args::{CacheCommands, Cli, Commands};

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use tracelens_cache::Store;
use tracelens_runtime::{Config, Pipeline, PipelineConfig, ScanProgress, resolve_workspace_path};

pub fn run(cli: Cli) -> Result<()> {
    let workspace = resolve_workspace_path(cli.data_dir.as_deref())?;
    let cache_path = workspace.join("cache.db");

    match cli.command {
        Commands::Scan {
            roots,
            workers,
            no_evict,
            json,
            quiet,
        } => run_scan(cache_path, roots, workers, no_evict, json, quiet),
        Commands::Cache { command } => run_cache(cache_path, command),
    }
}

fn run_scan(
    cache_path: PathBuf,
    roots: Vec<PathBuf>,
    workers: Option<usize>,
    no_evict: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let file_config = Config::load().unwrap_or_default();

    let roots = if !roots.is_empty() {
        roots
    } else if !file_config.roots.is_empty() {
        file_config.roots.clone()
    } else {
        tracelens_runtime::default_log_root()
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    };
    if roots.is_empty() {
        anyhow::bail!("no scan roots: pass one or more ROOT paths or set `roots` in the config");
    }

    let mut config = PipelineConfig::new(roots, cache_path);
    if let Some(workers) = workers.or(file_config.workers) {
        config.workers = workers.max(1);
    }
    config.evict = !no_evict;

    let pipeline = Pipeline::new(config)?;

    let cancel = pipeline.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
        eprintln!("\nstopping after in-flight files...");
    })
    .context("failed to install interrupt handler")?;

    let color = std::io::stderr().is_terminal();
    let report = pipeline.process_blocking(|progress| {
        if quiet {
            return;
        }
        match progress {
            ScanProgress::DiscoveryCompleted { projects, files } => {
                eprintln!("discovered {} project(s), {} session file(s)", projects, files);
            }
            ScanProgress::FileFailed { path, reason } => {
                if color {
                    eprintln!("{} {}: {}", "failed".red(), path.display(), reason);
                } else {
                    eprintln!("failed {}: {}", path.display(), reason);
                }
            }
            ScanProgress::Completed {
                sessions,
                failures,
                cache_hits,
                cache_misses,
                evicted,
            } => {
                eprintln!(
                    "{} session(s), {} failure(s); cache: {} hit(s), {} miss(es), {} evicted",
                    sessions, failures, cache_hits, cache_misses, evicted
                );
            }
            _ => {}
        }
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let color = std::io::stdout().is_terminal();
        print!("{}", render::render_report(&report, color));
    }

    Ok(())
}

fn run_cache(cache_path: PathBuf, command: CacheCommands) -> Result<()> {
    let store = Store::open(&cache_path)
        .with_context(|| format!("failed to open cache at {}", cache_path.display()))?;

    match command {
        CacheCommands::Stats => {
            let stats = store.stats()?;
            println!("cache: {}", stats.db_path.display());
            println!("entries: {}", stats.entries);
            println!("size: {} bytes", stats.db_size_bytes);
        }
        CacheCommands::Clear => {
            let removed = store.clear()?;
            println!("removed {} cached session(s)", removed);
        }
    }

    Ok(())
}

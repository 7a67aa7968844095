use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tracelens")]
#[command(about = "Reconstruct and summarize AI coding assistant sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Workspace data directory (cache and config live here)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan transcript roots and produce the aggregate session report
    Scan {
        /// Scan roots; falls back to config, then ~/.claude/projects
        #[arg(value_name = "ROOT")]
        roots: Vec<PathBuf>,

        /// Worker pool size (default: available parallelism)
        #[arg(long)]
        workers: Option<usize>,

        /// Keep cache entries for files that vanished from disk
        #[arg(long)]
        no_evict: bool,

        /// Emit the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Suppress per-file progress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Inspect or reset the session cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show entry count and on-disk size
    Stats,
    /// Drop every cached session
    Clear,
}

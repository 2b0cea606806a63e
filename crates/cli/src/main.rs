//! `simplecache`: read entries from a Chromium simple cache directory.
//!
//! ```text
//! simplecache list [CACHEDIR]
//! simplecache header (--url URL | --hash HEX) [CACHEDIR]
//! simplecache body (--url URL | --hash HEX) [CACHEDIR]
//! ```

mod commands;
mod error;

use crate::error::{ErrorKind, Result};
use clap::{Args, Parser, Subcommand};
use exn::ResultExt;
use simplecache_config::Config;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "simplecache", version, about = "Read entries from a Chromium simple cache (v6 or v7)")]
struct Cli {
    /// Config file to load instead of the default one.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the hash and url of every entry.
    List {
        /// Path to the cache directory. Defaults to the configured or detected one.
        cachedir: Option<PathBuf>,
    },
    /// Print the status and response headers of an entry.
    Header {
        #[command(flatten)]
        target: Target,
        /// Path to the cache directory. Defaults to the configured or detected one.
        cachedir: Option<PathBuf>,
    },
    /// Write the body of an entry to stdout.
    Body {
        #[command(flatten)]
        target: Target,
        /// Path to the cache directory. Defaults to the configured or detected one.
        cachedir: Option<PathBuf>,
    },
}

impl Command {
    fn cachedir(&self) -> Option<&Path> {
        match self {
            Self::List { cachedir } | Self::Header { cachedir, .. } | Self::Body { cachedir, .. } => cachedir.as_deref(),
        }
    }
}

/// Which entry to open.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Entry url.
    #[arg(long)]
    url: Option<String>,
    /// Entry hash, as hexadecimal.
    #[arg(long, value_parser = parse_hash)]
    hash: Option<u64>,
}

impl Target {
    fn hash(&self) -> u64 {
        self.hash.unwrap_or_else(|| simplecache::lookup_hash(self.url.as_deref().unwrap_or_default()))
    }
}

fn parse_hash(value: &str) -> std::result::Result<u64, String> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hash `{value}`: {e}"))
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).compact().init();
}

fn run(cli: Cli, config: &Config) -> Result<()> {
    let dir = match cli.command.cachedir() {
        Some(dir) => dir.to_path_buf(),
        None => config.cache_dir().or_raise(|| ErrorKind::Config)?,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match &cli.command {
        Command::List { .. } => {
            let cache = simplecache::open_cache(&dir).or_raise(|| ErrorKind::OpenCache)?;
            commands::list(&cache, &mut out)?;
        },
        Command::Header { target, .. } => {
            let entry = simplecache::open_entry(target.hash(), &dir).or_raise(|| ErrorKind::OpenEntry)?;
            commands::header(&entry, &mut out)?;
        },
        Command::Body { target, .. } => {
            let entry = simplecache::open_entry(target.hash(), &dir).or_raise(|| ErrorKind::OpenEntry)?;
            commands::body(&entry, &mut out)?;
        },
    }
    out.flush().or_raise(|| ErrorKind::Output)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("simplecache: {err:?}");
            return ExitCode::FAILURE;
        },
    };
    init_tracing(&config);

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("simplecache: {err:?}");
            ExitCode::FAILURE
        },
    }
}

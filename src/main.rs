mod app;
mod cache;
mod config;
mod discogs;
mod error;
mod fetch;
mod list;
mod logging;
mod search;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crate::cache::CachePolicy;

#[derive(Parser, Debug)]
#[command(name = "lom")]
#[command(about = "Browse artist releases and album searches from Discogs, cached locally")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lom/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the releases of an artist
  Releases {
    /// Discogs artist id
    #[arg(short, long, default_value_t = 2)]
    artist: u64,
    /// Number of pages to load
    #[arg(short, long, default_value_t = 1)]
    pages: usize,
    /// cached-only, cached-then-load, cached-else-load or reload
    #[arg(long, default_value = "cached-then-load", value_parser = parse_policy)]
    policy: CachePolicy,
  },
  /// Search the database
  Search {
    text: String,
    /// Search artists instead of free text
    #[arg(short, long)]
    artist: bool,
    #[arg(short, long, default_value_t = 1)]
    pages: usize,
    #[arg(long, default_value = "cached-then-load", value_parser = parse_policy)]
    policy: CachePolicy,
  },
  /// Show recent searches
  History {
    #[arg(short, long, default_value_t = 30)]
    limit: usize,
  },
  /// Remove cached entities
  ClearCache {
    /// Only entities listed under this filter identifier (e.g. artists/2/releases)
    #[arg(short, long)]
    filter: Option<String>,
  },
}

fn parse_policy(s: &str) -> std::result::Result<CachePolicy, String> {
  CachePolicy::parse(s).ok_or_else(|| format!("unknown cache policy '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(&logging::data_dir()?, args.verbose)?;

  let config = config::Config::load(args.config.as_deref())?;
  let app = app::App::new(config)?;

  match args.command {
    Command::Releases {
      artist,
      pages,
      policy,
    } => app.releases(artist, pages, policy).await,
    Command::Search {
      text,
      artist,
      pages,
      policy,
    } => app.search(&text, artist, pages, policy).await,
    Command::History { limit } => app.history(limit).await,
    Command::ClearCache { filter } => app.clear_cache(filter).await,
  }
}

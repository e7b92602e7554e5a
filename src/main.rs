mod app;
mod backend;
mod cache;
mod chat;
mod clients;
mod commands;
mod config;
mod db;
mod event;
mod generation;
mod http;
mod lifecycle;
mod logging;
mod network;
mod notify;
mod sync;
mod worker;

#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tamy-sw")]
#[command(about = "Offline cache, background sync and push notifications for the Tâm Ý chat app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tamy-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the app shell is served from
  #[arg(long)]
  origin: Option<String>,

  /// Path to the worker database (default: $XDG_DATA_HOME/tamy-sw/worker.db)
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  // Flushes the log file on drop
  let _guard = logging::init(&config.log)?;

  let app = app::App::new(config, args.db.as_deref())?;
  app.run(args.command).await?;

  Ok(())
}

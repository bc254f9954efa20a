mod app;
mod config;
mod event;
mod id;
mod notify;
mod remote;
mod request;
mod store;
mod sync;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::app::{App, Command};
use crate::sync::SyncAction;

#[derive(Parser, Debug)]
#[command(name = "tripsync")]
#[command(about = "Offline cache and sync queue for the travel planner API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tripsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the travel planner API
  #[arg(long)]
  api_url: Option<String>,

  /// Start in offline mode: mutations are queued instead of sent
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// POST a new resource
  Create {
    endpoint: String,
    /// JSON body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// PUT a replacement resource
  Update {
    endpoint: String,
    /// JSON body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// DELETE a resource
  Delete { endpoint: String },
  /// GET a resource through the offline cache
  Get {
    endpoint: String,
    /// Cache TTL in seconds (default from config)
    #[arg(long)]
    ttl: Option<u64>,
  },
  /// Replay queued mutations now
  Sync,
  /// List queued mutations
  Queue,
  /// Follow online/offline signals from stdin and sync on reconnect
  Watch,
}

impl CliCommand {
  fn into_command(self) -> Result<Command> {
    let command = match self {
      Self::Create { endpoint, data } => mutation(SyncAction::Create, endpoint, data)?,
      Self::Update { endpoint, data } => mutation(SyncAction::Update, endpoint, data)?,
      Self::Delete { endpoint } => mutation(SyncAction::Delete, endpoint, None)?,
      Self::Get { endpoint, ttl } => Command::Get {
        endpoint,
        ttl: ttl.map(Duration::from_secs),
      },
      Self::Sync => Command::Sync,
      Self::Queue => Command::Queue,
      Self::Watch => Command::Watch,
    };
    Ok(command)
  }
}

fn mutation(action: SyncAction, endpoint: String, data: Option<String>) -> Result<Command> {
  let data = match data {
    Some(raw) => {
      serde_json::from_str(&raw).map_err(|e| eyre!("--data is not valid JSON: {}", e))?
    }
    None => Value::Null,
  };
  Ok(Command::Mutate {
    action,
    endpoint,
    data,
  })
}

/// Log to a daily file under the data directory, or stderr when there is none.
fn init_logging(config: &config::Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log_level))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  match config.log_dir() {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "tripsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(url) = args.api_url {
    config.api.base_url = Some(url);
  }
  if args.offline {
    config.start_offline = true;
  }

  let _log_guard = init_logging(&config)?;

  let command = args.command.into_command()?;
  let mut app = App::new(config).await?;
  app.run(command).await?;

  Ok(())
}

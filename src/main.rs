mod app;
mod cache;
mod config;
mod connectivity;
mod db;
mod event;
mod http;
mod logging;
mod network;
mod protocol;
mod queue;
mod replay;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use crate::connectivity::Connectivity;
use crate::http::{HttpRequest, Method};
use crate::worker::LiveWorker;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline request queue and replay worker for lease field entry")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Asset origin, overrides the config file
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Database file, overrides the config file
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the worker, reading host messages from stdin (default)
  Run,
  /// Cache the asset manifest and activate the current cache version
  Install,
  /// Delete cache generations other than the current version
  Activate,
  /// Send one request through the interception path
  Fetch {
    /// HTTP method
    method: String,
    /// URL, absolute or relative to the origin
    url: String,
    /// Header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
    /// Treat the runtime as offline
    #[arg(long)]
    offline: bool,
  },
  /// List queued requests
  Queue {
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },
  /// Replay queued requests now
  Replay,
  /// Drop a queued request by id
  Remove { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration; --origin alone is enough to run without a file
  let mut config = config::Config::load(args.config.as_deref(), args.origin.as_deref())?;
  if let Some(db) = args.db {
    config.queue.db_path = Some(db);
  }

  match args.command.unwrap_or(Command::Run) {
    Command::Run => {
      let mut app = app::LiveApp::new(config).await?;
      app.run().await?;
    }
    Command::Install => {
      let mut worker = LiveWorker::open(&config, Connectivity::default(), None)?;
      worker.init().await?;
      println!(
        "installed {} assets into {}",
        config.cache.manifest.len(),
        worker.cache().cache_name()
      );
    }
    Command::Activate => {
      let mut worker = LiveWorker::open(&config, Connectivity::default(), None)?;
      for name in worker.activate()? {
        println!("deleted {}", name);
      }
    }
    Command::Fetch {
      method,
      url,
      headers,
      data,
      offline,
    } => {
      let mut worker = LiveWorker::open(&config, Connectivity::new(!offline), None)?;
      let mut request = HttpRequest::new(method.parse::<Method>()?, url);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(data) = data {
        request = request.with_body(data);
      }

      let served = worker.handle_fetch(request).await?;
      // One-shot: nothing stays around for the fallback timer
      worker.shutdown();

      match served.cached_at {
        Some(at) => println!(
          "{} ({:?}, cached {})",
          served.response.status,
          served.source,
          at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("{} ({:?})", served.response.status, served.source),
      }
      let body = served.response.body_text();
      if !body.is_empty() {
        println!("{}", body);
      }
    }
    Command::Queue { json } => {
      let worker = LiveWorker::open(&config, Connectivity::default(), None)?;
      let queued = worker.queued()?;
      if json {
        println!(
          "{}",
          serde_json::to_string_pretty(&queued)
            .map_err(|e| eyre!("Failed to serialize queue: {}", e))?
        );
      } else if queued.is_empty() {
        println!("queue is empty");
      } else {
        for entry in &queued {
          let queued_at = chrono::DateTime::from_timestamp_millis(entry.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
          println!(
            "{:>6}  {:<6}  {}  {}",
            entry.id,
            entry.method.as_str(),
            queued_at,
            entry.url
          );
        }
      }
    }
    Command::Replay => {
      let worker = LiveWorker::open(&config, Connectivity::default(), None)?;
      let report = worker.replay_now().await?;
      println!(
        "delivered {}, still queued {}",
        report.delivered.len(),
        report.failed.len()
      );
    }
    Command::Remove { id } => {
      let worker = LiveWorker::open(&config, Connectivity::default(), None)?;
      worker.remove(id)?;
      println!("removed {}", id);
    }
  }

  Ok(())
}

use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::connectivity::{self, Connectivity};
use crate::event::{Event, EventHandler};
use crate::network::Network;
use crate::protocol::Reply;
use crate::queue::QueueStore;
use crate::worker::{LiveWorker, Worker};

/// The run loop wired to SQLite, reqwest and stdout.
pub type LiveApp = App<LiveWorker, Stdout>;

/// The long-running worker process: one host message in, one reply out.
pub struct App<W, O> {
  worker: W,

  /// Host messages, sync registrations and probe results
  events: EventHandler,

  /// Replies to the host
  out: O,

  /// Background connectivity probe, if configured
  probe: Option<JoinHandle<()>>,

  /// Whether to quit
  should_quit: bool,
}

impl LiveApp {
  pub async fn new(config: Config) -> Result<Self> {
    let events = EventHandler::new();
    let worker = LiveWorker::open(&config, Connectivity::default(), Some(events.sender()))?;

    let probe = config.connectivity.probe_url.clone().map(|url| {
      connectivity::spawn_probe(
        worker.network(),
        url,
        Duration::from_secs(config.connectivity.interval_secs.max(1)),
        events.sender(),
      )
    });

    let mut app = App::with_parts(worker, events, tokio::io::stdout());
    app.probe = probe;
    Ok(app)
  }
}

impl<Q, S, N, O> App<Worker<Q, S, N>, O>
where
  Q: QueueStore,
  S: CacheStorage,
  N: Network,
  O: AsyncWrite + Unpin,
{
  pub fn with_parts(worker: Worker<Q, S, N>, events: EventHandler, out: O) -> Self {
    Self {
      worker,
      events,
      out,
      probe: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    if let Err(e) = self.worker.init().await {
      warn!(error = %e, "install failed, serving with the existing cache");
    }

    // Entries left over from a previous run
    match self.worker.pending_count() {
      Ok(0) => {}
      Ok(pending) => {
        info!(pending, "found queued requests from a previous run");
        self.worker.on_online();
      }
      Err(e) => warn!(error = %e, "could not read the request queue"),
    }

    // Main loop
    while !self.should_quit {
      match self.events.next().await {
        Some(event) => self.handle_event(event).await?,
        None => break,
      }
    }

    if let Some(probe) = self.probe.take() {
      probe.abort();
    }
    self.worker.shutdown();

    Ok(())
  }

  async fn handle_event(&mut self, event: Event) -> Result<()> {
    match event {
      Event::Fetch { id, request } => {
        let reply = match self.worker.handle_fetch(request).await {
          Ok(served) => Reply::response(id, served),
          Err(e) => Reply::error(Some(id), &e),
        };
        self.emit(&reply).await?;
      }
      Event::Sync(tag) => match self.worker.on_sync(&tag).await {
        Ok(Some(report)) => self.emit(&Reply::Drained(report)).await?,
        Ok(None) => {}
        Err(e) => {
          error!(tag, error = %e, "replay aborted");
          self.emit(&Reply::error(None, &e)).await?;
        }
      },
      Event::Online => self.worker.on_online(),
      Event::Offline => self.worker.on_offline(),
      Event::Status => {
        let reply = match self.worker.pending_count() {
          Ok(pending) => Reply::Status {
            online: self.worker.connectivity().is_online(),
            pending,
            cache: self.worker.cache().cache_name().to_string(),
            draining: self.worker.is_draining(),
          },
          Err(e) => Reply::error(None, &e),
        };
        self.emit(&reply).await?;
      }
      Event::Invalid(message) => {
        warn!(reason = %message, "ignoring invalid host message");
        self.emit(&Reply::Error { id: None, message }).await?;
      }
      Event::Shutdown => self.should_quit = true,
    }
    Ok(())
  }

  async fn emit(&mut self, reply: &Reply) -> Result<()> {
    let mut line = reply.to_line()?;
    line.push('\n');
    self
      .out
      .write_all(line.as_bytes())
      .await
      .map_err(|e| eyre!("Failed to write reply: {}", e))?;
    self
      .out
      .flush()
      .await
      .map_err(|e| eyre!("Failed to flush reply: {}", e))?;
    Ok(())
  }
}

//! The worker context: owns the cache, the queue and the replay machinery and
//! routes every intercepted request through them.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheManager, CacheStorage, Served, SqliteCacheStorage};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::db::Database;
use crate::event::Event;
use crate::http::{HttpRequest, Method};
use crate::network::{HttpNetwork, Network};
use crate::queue::{NewRequest, QueueStore, QueuedRequest, SqliteQueue};
use crate::replay::{DrainReport, FallbackTimer, ReplayCoordinator, SyncManager, REPLAY_TAG};

/// Install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  New,
  /// Install failed; the previous cache generation stays in charge
  Redundant,
  Installed,
  Activated,
  Stopped,
}

/// Worker wired to SQLite and reqwest.
pub type LiveWorker = Worker<SqliteQueue, SqliteCacheStorage, HttpNetwork>;

pub struct Worker<Q: QueueStore, S: CacheStorage, N: Network> {
  /// Base for the page's relative request URLs
  origin: Url,
  cache: CacheManager<S, N>,
  queue: Arc<Q>,
  network: Arc<N>,
  replay: Arc<ReplayCoordinator<Q, N>>,
  sync: SyncManager,
  fallback: FallbackTimer,
  connectivity: Connectivity,
  lifecycle: Lifecycle,
}

impl LiveWorker {
  /// Open the configured database and build a worker around it.
  ///
  /// `events` is the run loop's channel; without it background sync is
  /// unavailable and replay falls back to the timer.
  pub fn open(
    config: &Config,
    connectivity: Connectivity,
    events: Option<mpsc::UnboundedSender<Event>>,
  ) -> Result<Self> {
    let path = match &config.queue.db_path {
      Some(path) => path.clone(),
      None => Database::default_path()?,
    };
    let db = Arc::new(Database::open(&path)?);
    debug!(path = %path.display(), "opened database");

    Worker::new(
      config,
      Arc::new(SqliteQueue::new(Arc::clone(&db))),
      Arc::new(SqliteCacheStorage::new(db)),
      Arc::new(HttpNetwork::new(&config.network)?),
      connectivity,
      events,
    )
  }
}

impl<Q: QueueStore, S: CacheStorage, N: Network> Worker<Q, S, N> {
  pub fn new(
    config: &Config,
    queue: Arc<Q>,
    storage: Arc<S>,
    network: Arc<N>,
    connectivity: Connectivity,
    events: Option<mpsc::UnboundedSender<Event>>,
  ) -> Result<Self> {
    let events = events.filter(|_| config.replay.background_sync);
    let origin = config.origin_url()?;

    Ok(Self {
      cache: CacheManager::new(
        &config.cache,
        origin.clone(),
        storage,
        Arc::clone(&network),
        connectivity.clone(),
      ),
      replay: Arc::new(ReplayCoordinator::new(
        Arc::clone(&queue),
        Arc::clone(&network),
        config.replay.delay(),
      )),
      queue,
      network,
      sync: SyncManager::new(events, connectivity.clone()),
      fallback: FallbackTimer::new(config.replay.fallback_delay()),
      connectivity,
      origin,
      lifecycle: Lifecycle::New,
    })
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  pub fn cache(&self) -> &CacheManager<S, N> {
    &self.cache
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn network(&self) -> Arc<N> {
    Arc::clone(&self.network)
  }

  /// Install the asset manifest, then activate.
  ///
  /// If install fails the worker becomes redundant for this version and old
  /// cache generations are left alone.
  pub async fn init(&mut self) -> Result<()> {
    match self.cache.install().await {
      Ok(_) => self.lifecycle = Lifecycle::Installed,
      Err(e) => {
        self.lifecycle = Lifecycle::Redundant;
        return Err(e);
      }
    }

    self.activate()?;
    Ok(())
  }

  /// Purge stale cache generations and take control.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    let deleted = self.cache.activate()?;
    self.lifecycle = Lifecycle::Activated;
    info!(cache = %self.cache.cache_name(), "worker activated");
    Ok(deleted)
  }

  /// Stop pending timers. Queued requests stay in the store.
  pub fn shutdown(&mut self) {
    self.fallback.cancel();
    self.lifecycle = Lifecycle::Stopped;
    debug!("worker stopped");
  }

  /// Answer an intercepted request.
  ///
  /// Relative URLs are resolved against the origin first. A request that
  /// cannot be sent at all, or a durable-store failure while queueing a
  /// mutation, is an error; every other path produces a response.
  pub async fn handle_fetch(&self, request: HttpRequest) -> Result<Served> {
    let request = request
      .resolve(&self.origin)
      .inspect_err(|e| warn!(error = %e, "rejected request"))?;

    match request.method {
      Method::Get => Ok(
        self
          .cache
          .serve_get(&request)
          .await
          .unwrap_or_else(|| Served::unavailable("offline and not cached")),
      ),
      method if method.is_mutating() => self.deliver_or_queue(request).await,
      _ => match self.network.fetch(&request).await {
        Ok(response) => Ok(Served::from_network(response)),
        Err(e) => {
          warn!(method = %request.method, url = %request.url, error = %e, "request failed");
          Ok(Served::unavailable("network unavailable"))
        }
      },
    }
  }

  async fn deliver_or_queue(&self, request: HttpRequest) -> Result<Served> {
    let attempt = request.clone();
    match self.network.fetch(&attempt).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(e) => {
        info!(method = %request.method, url = %request.url, error = %e, "delivery failed, queueing");
        let entry = self.enqueue(&request)?;
        debug!(id = entry.id, "request queued for replay");
        self.schedule_replay();
        Ok(Served::queued())
      }
    }
  }

  fn enqueue(&self, request: &HttpRequest) -> Result<QueuedRequest> {
    self
      .queue
      .enqueue(NewRequest::capture(request)?)
      .inspect_err(|e| error!(url = %request.url, error = %e, "failed to queue request"))
  }

  /// Ask for a replay: a sync registration when available, the fallback
  /// timer otherwise.
  fn schedule_replay(&self) {
    if self.sync.is_supported() {
      if let Err(e) = self.sync.register(REPLAY_TAG) {
        warn!(error = %e, "sync registration failed");
      }
      return;
    }

    let replay = Arc::clone(&self.replay);
    self.fallback.arm(move || async move {
      if let Err(e) = replay.drain().await {
        error!(error = %e, "fallback replay failed");
      }
    });
  }

  /// Handle a fired sync registration. Unknown tags are ignored.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<DrainReport>> {
    if tag != REPLAY_TAG {
      debug!(tag, "ignoring unknown sync tag");
      return Ok(None);
    }
    self.replay.drain().await.map(Some)
  }

  /// Connectivity restored: request a replay. Registering while online also
  /// fires any registration made while offline.
  pub fn on_online(&self) {
    let was_online = self.connectivity.set_online(true);
    if !was_online {
      info!("connectivity restored");
    }
    self.schedule_replay();
  }

  pub fn on_offline(&self) {
    if self.connectivity.set_online(false) {
      info!("connectivity lost");
    }
  }

  /// Drain the queue now, bypassing triggers.
  pub async fn replay_now(&self) -> Result<DrainReport> {
    self.replay.drain().await
  }

  pub fn is_draining(&self) -> bool {
    self.replay.is_draining()
  }

  pub fn queued(&self) -> Result<Vec<QueuedRequest>> {
    self.queue.list_all()
  }

  pub fn pending_count(&self) -> Result<usize> {
    self.queue.count()
  }

  pub fn remove(&self, id: i64) -> Result<()> {
    self.queue.remove(id)
  }
}

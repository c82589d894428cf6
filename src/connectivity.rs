//! Shared online/offline flag and the optional background probe that drives it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::event::Event;
use crate::http::HttpRequest;
use crate::network::Network;

/// What the runtime currently believes about the network.
///
/// Cheap to clone; all clones observe the same flag.
#[derive(Clone, Debug)]
pub struct Connectivity {
  online: Arc<AtomicBool>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(online)),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Update the flag, returning the previous value.
  pub fn set_online(&self, online: bool) -> bool {
    self.online.swap(online, Ordering::SeqCst)
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

/// Spawn a task that probes `url` every `interval` and reports transitions
/// as `Event::Online` / `Event::Offline`.
///
/// Any response counts as reachable; only a transport error means offline.
pub fn spawn_probe<N: Network>(
  network: Arc<N>,
  url: String,
  interval: Duration,
  tx: mpsc::UnboundedSender<Event>,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    let request = HttpRequest::new(crate::http::Method::Head, url);
    let mut last: Option<bool> = None;
    let mut ticker = tokio::time::interval(interval);

    loop {
      ticker.tick().await;
      let reachable = network.fetch(&request).await.is_ok();
      debug!(reachable, url = %request.url, "connectivity probe");

      if last != Some(reachable) {
        if last.is_some() {
          info!(reachable, "connectivity changed");
        }
        let event = if reachable { Event::Online } else { Event::Offline };
        if tx.send(event).is_err() {
          break;
        }
        last = Some(reachable);
      }
    }
  })
}

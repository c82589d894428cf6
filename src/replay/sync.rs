//! Replay triggers: background-sync registrations and the fallback timer.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connectivity::Connectivity;
use crate::event::Event;

/// Tag of the sync registration that replays queued requests.
pub const REPLAY_TAG: &str = "replay-queued-requests";

/// Background-sync registrations.
///
/// A registered tag fires as an `Event::Sync` once the runtime is online.
/// Tags registered while offline are held (deduplicated) until `flush` runs
/// after connectivity returns.
pub struct SyncManager {
  tx: Option<mpsc::UnboundedSender<Event>>,
  connectivity: Connectivity,
  pending: Mutex<BTreeSet<String>>,
}

impl SyncManager {
  /// `tx` is the worker's event channel; `None` means the host has no
  /// background-sync capability.
  pub fn new(tx: Option<mpsc::UnboundedSender<Event>>, connectivity: Connectivity) -> Self {
    Self {
      tx,
      connectivity,
      pending: Mutex::new(BTreeSet::new()),
    }
  }

  pub fn is_supported(&self) -> bool {
    self.tx.is_some()
  }

  /// Register `tag`. Fails when background sync is unavailable.
  pub fn register(&self, tag: &str) -> Result<()> {
    if self.tx.is_none() {
      return Err(eyre!("Background sync is not available"));
    }

    self
      .pending
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(tag.to_string());
    debug!(tag, "registered background sync");

    if self.connectivity.is_online() {
      self.flush();
    }
    Ok(())
  }

  /// Fire every pending registration. Returns how many were fired.
  pub fn flush(&self) -> usize {
    let Some(tx) = &self.tx else {
      return 0;
    };

    let tags = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
    let fired = tags.len();
    for tag in tags {
      if tx.send(Event::Sync(tag)).is_err() {
        break;
      }
    }
    fired
  }

  #[cfg(test)]
  pub fn pending(&self) -> Vec<String> {
    self
      .pending
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .cloned()
      .collect()
  }
}

/// One-shot replay timer used when background sync is unavailable.
///
/// The first `arm` of a cycle schedules the callback after `delay`; further
/// arms are ignored until it fires.
pub struct FallbackTimer {
  delay: Duration,
  armed: Arc<AtomicBool>,
  handle: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackTimer {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      armed: Arc::new(AtomicBool::new(false)),
      handle: Mutex::new(None),
    }
  }

  #[cfg(test)]
  pub fn is_armed(&self) -> bool {
    self.armed.load(Ordering::SeqCst)
  }

  /// Schedule `fire` unless a timer is already pending. Returns true if armed.
  pub fn arm<F, Fut>(&self, fire: F) -> bool
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    if self.armed.swap(true, Ordering::SeqCst) {
      return false;
    }

    let armed = Arc::clone(&self.armed);
    let delay = self.delay;
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      armed.store(false, Ordering::SeqCst);
      fire().await;
    });

    debug!(delay_ms = delay.as_millis() as u64, "armed fallback replay timer");
    *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    true
  }

  /// Drop a pending timer without firing it.
  pub fn cancel(&self) {
    if let Some(handle) = self
      .handle
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      handle.abort();
    }
    self.armed.store(false, Ordering::SeqCst);
  }
}

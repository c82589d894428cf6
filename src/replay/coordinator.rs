//! Drains the mutation queue against the live network.

use color_eyre::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::http::HttpRequest;
use crate::network::Network;
use crate::queue::{QueueStore, QueuedRequest};

/// Outcome of one `drain` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Ids removed after an HTTP-ok response, in replay order
  pub delivered: Vec<i64>,
  /// Ids left queued after an error status or a network failure
  pub failed: Vec<i64>,
  /// Passes over the queue (more than one when triggers were coalesced)
  pub passes: usize,
  /// True when another drain was already running and this trigger was folded into it
  pub coalesced: bool,
}

impl DrainReport {
  fn coalesced() -> Self {
    Self {
      coalesced: true,
      ..Self::default()
    }
  }

  pub fn attempted(&self) -> usize {
    self.delivered.len() + self.failed.len()
  }
}

#[derive(Debug, Default)]
struct DrainState {
  running: bool,
  rerun: bool,
}

/// Clears the running flag if a drain exits early (store error, panic).
struct DrainGuard<'a> {
  state: &'a Mutex<DrainState>,
  released: bool,
}

impl DrainGuard<'_> {
  /// Either claim a pending rerun or release the drain, atomically.
  fn finish_or_rerun(&mut self) -> bool {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.rerun {
      state.rerun = false;
      true
    } else {
      state.running = false;
      self.released = true;
      false
    }
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    if !self.released {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      state.running = false;
      state.rerun = false;
    }
  }
}

/// Build the request actually sent for a queued entry.
///
/// Queued bodies are always JSON form submissions, so a non-empty body forces
/// `Content-Type: application/json`, replacing any captured content type.
pub fn replay_request(entry: &QueuedRequest) -> HttpRequest {
  let mut headers = entry.headers.clone();

  if entry.body.as_deref().is_some_and(|b| !b.is_empty()) {
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
    headers.push(("Content-Type".to_string(), "application/json".to_string()));
  }

  HttpRequest {
    method: entry.method.into(),
    url: entry.url.clone(),
    headers,
    body: entry.body.clone(),
  }
}

/// Replays queued mutations in ascending id order, one at a time.
///
/// Only one drain runs at a time. A trigger that arrives mid-drain is folded
/// into a single follow-up pass over entries the running drain has not yet
/// attempted.
pub struct ReplayCoordinator<Q: QueueStore, N: Network> {
  queue: Arc<Q>,
  network: Arc<N>,
  /// Pause between entries
  delay: Duration,
  state: Mutex<DrainState>,
}

impl<Q: QueueStore, N: Network> ReplayCoordinator<Q, N> {
  pub fn new(queue: Arc<Q>, network: Arc<N>, delay: Duration) -> Self {
    Self {
      queue,
      network,
      delay,
      state: Mutex::new(DrainState::default()),
    }
  }

  pub fn is_draining(&self) -> bool {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .running
  }

  /// Attempt every queued entry once.
  ///
  /// Per-entry failures are logged and leave the entry queued. Only a store
  /// failure (list or remove) aborts the drain with an error.
  pub async fn drain(&self) -> Result<DrainReport> {
    {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      if state.running {
        state.rerun = true;
        debug!("drain already running, coalescing trigger");
        return Ok(DrainReport::coalesced());
      }
      state.running = true;
    }

    let mut guard = DrainGuard {
      state: &self.state,
      released: false,
    };
    let mut report = DrainReport::default();
    let mut seen = HashSet::new();

    loop {
      self.pass(&mut report, &mut seen).await?;
      if !guard.finish_or_rerun() {
        break;
      }
    }

    if report.attempted() > 0 {
      info!(
        delivered = report.delivered.len(),
        failed = report.failed.len(),
        passes = report.passes,
        "replay drain finished"
      );
    }
    Ok(report)
  }

  async fn pass(&self, report: &mut DrainReport, seen: &mut HashSet<i64>) -> Result<()> {
    report.passes += 1;

    let entries: Vec<QueuedRequest> = self
      .queue
      .list_all()?
      .into_iter()
      .filter(|entry| seen.insert(entry.id))
      .collect();

    for entry in &entries {
      // The gap holds across passes of one drain, not just within a pass
      if report.attempted() > 0 && !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }

      let request = replay_request(entry);
      match self.network.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          self.queue.remove(entry.id)?;
          debug!(id = entry.id, url = %entry.url, status = response.status, "replayed request");
          report.delivered.push(entry.id);
        }
        Ok(response) => {
          warn!(id = entry.id, url = %entry.url, status = response.status, "replay rejected, keeping request");
          report.failed.push(entry.id);
        }
        Err(e) => {
          warn!(id = entry.id, url = %entry.url, error = %e, "replay failed, keeping request");
          report.failed.push(entry.id);
        }
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::http::Method;
  use crate::queue::{NewRequest, QueueMethod, SqliteQueue};
  use crate::testing::{Reply, ScriptedNetwork, UnavailableQueue};

  fn queue() -> Arc<SqliteQueue> {
    Arc::new(SqliteQueue::new(Arc::new(Database::open_in_memory().unwrap())))
  }

  fn enqueue(q: &SqliteQueue, url: &str) -> QueuedRequest {
    q.enqueue(NewRequest {
      method: QueueMethod::Post,
      url: url.to_string(),
      headers: Vec::new(),
      body: Some(r#"{"barrels":40}"#.to_string()),
    })
    .unwrap()
  }

  fn coordinator(
    q: &Arc<SqliteQueue>,
    network: &ScriptedNetwork,
  ) -> ReplayCoordinator<SqliteQueue, ScriptedNetwork> {
    ReplayCoordinator::new(Arc::clone(q), Arc::new(network.clone()), Duration::ZERO)
  }

  #[tokio::test]
  async fn test_drain_replays_in_fifo_order() {
    let q = queue();
    let urls: Vec<String> = (0..6).map(|i| format!("https://api/tickets/{i}")).collect();
    for url in &urls {
      enqueue(&q, url);
    }
    let network = ScriptedNetwork::new();

    let report = coordinator(&q, &network).drain().await.unwrap();
    assert_eq!(network.urls(), urls);
    assert_eq!(report.delivered.len(), 6);
    assert!(q.list_all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_entry_stays_until_later_success() {
    let q = queue();
    let a = enqueue(&q, "/a");
    let b = enqueue(&q, "/b");
    let c = enqueue(&q, "/c");

    let network = ScriptedNetwork::new();
    network.reply("/b", Reply::Fail).reply("/b", Reply::Status(201, ""));
    let replay = coordinator(&q, &network);

    let first = replay.drain().await.unwrap();
    assert_eq!(first.delivered, vec![a.id, c.id]);
    assert_eq!(first.failed, vec![b.id]);
    let remaining = q.list_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b.id);
    assert_eq!(remaining[0].url, "/b");

    let second = replay.drain().await.unwrap();
    assert_eq!(second.delivered, vec![b.id]);
    assert!(q.list_all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_error_status_keeps_entry_and_continues() {
    let q = queue();
    enqueue(&q, "/rejected");
    enqueue(&q, "/fine");
    let network = ScriptedNetwork::new();
    network.reply("/rejected", Reply::Status(500, "boom"));

    let report = coordinator(&q, &network).drain().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(q.list_all().unwrap()[0].url, "/rejected");
  }

  #[tokio::test]
  async fn test_entry_attempted_once_per_pass() {
    let q = queue();
    enqueue(&q, "/down");
    let network = ScriptedNetwork::new();
    network.reply("/down", Reply::Fail);

    let report = coordinator(&q, &network).drain().await.unwrap();
    assert_eq!(network.calls().len(), 1);
    assert_eq!(report.passes, 1);
  }

  #[test]
  fn test_replay_request_forces_json_content_type() {
    let entry = QueuedRequest {
      id: 1,
      url: "https://api/gauges".to_string(),
      method: QueueMethod::Patch,
      headers: vec![
        ("content-type".to_string(), "text/plain".to_string()),
        ("X-Lease".to_string(), "7".to_string()),
      ],
      body: Some(r#"{"top":"10-2"}"#.to_string()),
      timestamp: 0,
    };

    let request = replay_request(&entry);
    assert_eq!(request.method, Method::Patch);
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert_eq!(
      request
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .count(),
      1
    );
    assert_eq!(request.header("x-lease"), Some("7"));
  }

  #[tokio::test]
  async fn test_body_without_content_type_replayed_as_json() {
    let q = queue();
    enqueue(&q, "/gauge");
    let network = ScriptedNetwork::new();

    coordinator(&q, &network).drain().await.unwrap();
    let sent = &network.calls()[0];
    assert_eq!(sent.header("content-type"), Some("application/json"));
    assert_eq!(sent.body.as_deref(), Some(r#"{"barrels":40}"#));
  }

  #[test]
  fn test_bodyless_delete_keeps_captured_headers() {
    let entry = QueuedRequest {
      id: 3,
      url: "https://api/tickets/3".to_string(),
      method: QueueMethod::Delete,
      headers: vec![("Authorization".to_string(), "Bearer t".to_string())],
      body: None,
      timestamp: 0,
    };

    let request = replay_request(&entry);
    assert_eq!(request.header("content-type"), None);
    assert_eq!(request.headers.len(), 1);
  }

  #[tokio::test]
  async fn test_store_failure_aborts_drain_and_releases_guard() {
    let replay = ReplayCoordinator::new(
      Arc::new(UnavailableQueue),
      Arc::new(ScriptedNetwork::new()),
      Duration::ZERO,
    );

    assert!(replay.drain().await.is_err());
    assert!(!replay.is_draining());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_concurrent_triggers_never_double_deliver() {
    let q = queue();
    for i in 0..5 {
      enqueue(&q, &format!("/entry/{i}"));
    }
    let network = ScriptedNetwork::new();
    let replay = Arc::new(ReplayCoordinator::new(
      Arc::clone(&q),
      Arc::new(network.clone()),
      Duration::from_millis(10),
    ));

    let first = tokio::spawn({
      let replay = Arc::clone(&replay);
      async move { replay.drain().await.unwrap() }
    });
    while !replay.is_draining() {
      tokio::task::yield_now().await;
    }
    let second = replay.drain().await.unwrap();
    let first = first.await.unwrap();

    assert!(second.coalesced);
    assert!(second.delivered.is_empty());
    assert_eq!(first.delivered.len(), 5);

    let expected: Vec<String> = (0..5).map(|i| format!("/entry/{i}")).collect();
    assert_eq!(network.urls(), expected);
    assert!(!replay.is_draining());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_coalesced_trigger_picks_up_new_entries() {
    let q = queue();
    enqueue(&q, "/first");
    enqueue(&q, "/second");
    let network = ScriptedNetwork::new();
    let replay = Arc::new(ReplayCoordinator::new(
      Arc::clone(&q),
      Arc::new(network.clone()),
      Duration::from_millis(30),
    ));

    let running = tokio::spawn({
      let replay = Arc::clone(&replay);
      async move { replay.drain().await.unwrap() }
    });
    while network.calls().is_empty() {
      tokio::task::yield_now().await;
    }

    enqueue(&q, "/late");
    assert!(replay.drain().await.unwrap().coalesced);

    let report = running.await.unwrap();
    assert_eq!(report.passes, 2);
    assert_eq!(network.urls(), vec!["/first", "/second", "/late"]);
    assert!(q.list_all().unwrap().is_empty());

    let gaps = network.gaps();
    assert_eq!(gaps.len(), 2);
    for gap in gaps {
      assert!(gap >= Duration::from_millis(30), "entries sent {gap:?} apart");
    }
  }
}

//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::http::{HttpRequest, HttpResponse};
use crate::network::Network;
use crate::queue::{NewRequest, QueueStore, QueuedRequest};

/// Scripted answer for one URL.
#[derive(Debug, Clone)]
pub enum Reply {
  Status(u16, &'static str),
  Fail,
}

/// Network double that records every request and answers from a script.
///
/// Per-URL replies are consumed in order; once a URL's script is exhausted the
/// last reply keeps being returned. Unscripted URLs get a 200.
#[derive(Clone, Default)]
pub struct ScriptedNetwork {
  calls: Arc<Mutex<Vec<HttpRequest>>>,
  sent_at: Arc<Mutex<Vec<Instant>>>,
  script: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reply(&self, url: &str, reply: Reply) -> &Self {
    self
      .script
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(reply);
    self
  }

  pub fn calls(&self) -> Vec<HttpRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn urls(&self) -> Vec<String> {
    self.calls().into_iter().map(|r| r.url).collect()
  }

  /// Time between consecutive requests.
  pub fn gaps(&self) -> Vec<Duration> {
    let sent_at = self.sent_at.lock().unwrap();
    sent_at.windows(2).map(|w| w[1] - w[0]).collect()
  }
}

impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
    self.calls.lock().unwrap().push(request.clone());
    self.sent_at.lock().unwrap().push(Instant::now());

    let reply = {
      let mut script = self.script.lock().unwrap();
      match script.get_mut(&request.url) {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
      }
    };

    match reply.unwrap_or(Reply::Status(200, "")) {
      Reply::Status(status, body) => Ok(HttpResponse::new(status).with_body(body.as_bytes().to_vec())),
      Reply::Fail => Err(eyre!("connection refused: {}", request.url)),
    }
  }
}

/// Queue store whose backing database is gone.
pub struct UnavailableQueue;

impl QueueStore for UnavailableQueue {
  fn enqueue(&self, _request: NewRequest) -> Result<QueuedRequest> {
    Err(eyre!("Failed to insert queued request: database is locked"))
  }

  fn list_all(&self) -> Result<Vec<QueuedRequest>> {
    Err(eyre!("Failed to list queued requests: database is locked"))
  }

  fn remove(&self, _id: i64) -> Result<()> {
    Err(eyre!("Failed to remove queued request: database is locked"))
  }

  fn count(&self) -> Result<usize> {
    Err(eyre!("Failed to count queued requests: database is locked"))
  }
}

//! Line-delimited JSON messages exchanged with the host page on stdin/stdout.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{ResponseSource, Served};
use crate::http::{Headers, Method};
use crate::replay::DrainReport;

/// A message from the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
  /// An intercepted request
  Fetch {
    id: u64,
    method: Method,
    url: String,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    body: Option<String>,
  },
  /// A background-sync event fired by the host
  Sync { tag: String },
  /// The page observed restored connectivity
  Online,
  /// The page observed lost connectivity
  Offline,
  /// Ask for a status reply
  Status,
}

impl Inbound {
  pub fn parse(line: &str) -> Result<Self> {
    serde_json::from_str(line).map_err(|e| eyre!("Invalid message: {}", e))
  }
}

/// A reply written back to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
  Response {
    id: u64,
    status: u16,
    source: ResponseSource,
    headers: Headers,
    body: String,
  },
  Error {
    id: Option<u64>,
    message: String,
  },
  Drained(DrainReport),
  Status {
    online: bool,
    pending: usize,
    cache: String,
    draining: bool,
  },
}

impl Reply {
  pub fn response(id: u64, served: Served) -> Self {
    let body = served.response.body_text();
    Reply::Response {
      id,
      status: served.response.status,
      source: served.source,
      headers: served.response.headers,
      body,
    }
  }

  pub fn error(id: Option<u64>, err: &color_eyre::Report) -> Self {
    Reply::Error {
      id,
      message: format!("{:#}", err),
    }
  }

  pub fn to_line(&self) -> Result<String> {
    serde_json::to_string(self).map_err(|e| eyre!("Failed to serialize reply: {}", e))
  }
}

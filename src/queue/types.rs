use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::http::{Headers, HttpRequest, Method};

/// Methods that are stored for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueMethod {
  Post,
  Patch,
  Delete,
}

impl QueueMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueueMethod::Post => "POST",
      QueueMethod::Patch => "PATCH",
      QueueMethod::Delete => "DELETE",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "POST" => Ok(QueueMethod::Post),
      "PATCH" => Ok(QueueMethod::Patch),
      "DELETE" => Ok(QueueMethod::Delete),
      other => Err(eyre!("Not a queueable method: {}", other)),
    }
  }
}

impl TryFrom<Method> for QueueMethod {
  type Error = color_eyre::Report;

  fn try_from(method: Method) -> Result<Self> {
    match method {
      Method::Post => Ok(QueueMethod::Post),
      Method::Patch => Ok(QueueMethod::Patch),
      Method::Delete => Ok(QueueMethod::Delete),
      other => Err(eyre!("Not a queueable method: {}", other)),
    }
  }
}

impl From<QueueMethod> for Method {
  fn from(method: QueueMethod) -> Self {
    match method {
      QueueMethod::Post => Method::Post,
      QueueMethod::Patch => Method::Patch,
      QueueMethod::Delete => Method::Delete,
    }
  }
}

/// A mutating request captured after a failed delivery, before it gets an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
  pub method: QueueMethod,
  pub url: String,
  pub headers: Headers,
  pub body: Option<String>,
}

impl NewRequest {
  /// Capture an intercepted request. Fails for non-mutating methods.
  pub fn capture(request: &HttpRequest) -> Result<Self> {
    Ok(Self {
      method: QueueMethod::try_from(request.method)?,
      url: request.url.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
    })
  }
}

/// A durably stored request awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
  /// Store-assigned, strictly increasing; replay runs in ascending id order
  pub id: i64,
  pub url: String,
  pub method: QueueMethod,
  pub headers: Headers,
  pub body: Option<String>,
  /// Milliseconds since epoch at enqueue time (diagnostic only)
  pub timestamp: i64,
}

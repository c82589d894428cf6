use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::http::HttpResponse;

/// Indicates where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Served from the current cache generation
  Cache,
  /// Mutation stored for later delivery (synthesized 202)
  Queued,
  /// Nothing could answer (synthesized 504)
  Unavailable,
}

/// A response together with metadata about its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: HttpResponse,
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: HttpResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(response: HttpResponse, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  pub fn queued() -> Self {
    Self {
      response: HttpResponse::accepted(),
      source: ResponseSource::Queued,
      cached_at: None,
    }
  }

  pub fn unavailable(reason: &str) -> Self {
    Self {
      response: HttpResponse::gateway_timeout(reason),
      source: ResponseSource::Unavailable,
      cached_at: None,
    }
  }
}

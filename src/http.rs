//! Request and response values passed between the host, the cache and the network.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Ordered header list, captured as-is from the page.
pub type Headers = Vec<(String, String)>;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  /// POST, PATCH and DELETE change server state and are queued when undeliverable.
  pub fn is_mutating(&self) -> bool {
    matches!(self, Method::Post | Method::Patch | Method::Delete)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// A request as seen by the interception layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  #[serde(default)]
  pub headers: Headers,
  #[serde(default)]
  pub body: Option<String>,
}

impl HttpRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Case-insensitive header lookup; returns the first match.
  pub fn header(&self, name: &str) -> Option<&str> {
    header_value(&self.headers, name)
  }

  /// Make the URL absolute against `base` and check the request can be sent.
  ///
  /// Page requests are usually root-relative. Anything that is not http(s)
  /// after resolution, or carries a header the client cannot encode, is
  /// rejected here so it never reaches the queue.
  pub fn resolve(mut self, base: &Url) -> Result<Self> {
    let url = base
      .join(&self.url)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", self.url, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("Unsupported URL scheme '{}' in {}", url.scheme(), url));
    }

    for (name, value) in &self.headers {
      HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
      HeaderValue::from_str(value).map_err(|e| eyre!("Invalid value for header '{}': {}", name, e))?;
    }

    self.url = url.into();
    Ok(self)
  }
}

/// A response returned to the page, either from the network, the cache,
/// or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    header_value(&self.headers, name)
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Body-less reply telling the page its mutation was stored for later delivery.
  pub fn accepted() -> Self {
    Self::new(202)
  }

  /// Reply for requests neither the network nor the cache could answer.
  pub fn gateway_timeout(reason: &str) -> Self {
    Self::new(504)
      .with_header("Content-Type", "text/plain")
      .with_body(reason.as_bytes().to_vec())
  }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

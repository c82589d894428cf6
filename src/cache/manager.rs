//! Cache manager: install/activate lifecycle and the GET serving strategy.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CacheConfig;
use crate::connectivity::Connectivity;
use crate::http::{HttpRequest, HttpResponse};
use crate::network::Network;

use super::storage::CacheStorage;
use super::types::Served;

/// Keeps exactly one cache generation live and answers GET requests from it
/// when the network cannot.
pub struct CacheManager<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  connectivity: Connectivity,
  /// Current version-tagged cache name
  cache_name: String,
  origin: Url,
  manifest: Vec<String>,
}

impl<S: CacheStorage, N: Network> CacheManager<S, N> {
  pub fn new(
    config: &CacheConfig,
    origin: Url,
    storage: Arc<S>,
    network: Arc<N>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      storage,
      network,
      connectivity,
      cache_name: config.version.clone(),
      origin,
      manifest: config.manifest.clone(),
    }
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  /// Absolute URLs of the static asset manifest.
  pub fn manifest_urls(&self) -> Result<Vec<String>> {
    self
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(String::from)
          .map_err(|e| eyre!("Invalid manifest path '{}': {}", path, e))
      })
      .collect()
  }

  /// Fetch every manifest asset and store them under the current cache name.
  ///
  /// All-or-nothing: one failed or non-ok fetch fails the whole install and
  /// nothing is written. Returns the number of cached assets.
  pub async fn install(&self) -> Result<usize> {
    let urls = self.manifest_urls()?;

    let fetches = urls.into_iter().map(|url| {
      let network = Arc::clone(&self.network);
      async move {
        let response = network
          .fetch(&HttpRequest::get(url.clone()))
          .await
          .map_err(|e| eyre!("Failed to fetch manifest asset {}: {}", url, e))?;
        if !response.is_ok() {
          return Err(eyre!(
            "Failed to fetch manifest asset {}: status {}",
            url,
            response.status
          ));
        }
        Ok((url, response))
      }
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&self.cache_name, &entries)?;

    info!(cache = %self.cache_name, assets = entries.len(), "installed static assets");
    Ok(entries.len())
  }

  /// Delete every cache generation other than the current one.
  ///
  /// Returns the names that were deleted; a second call returns nothing.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();

    for name in self.storage.cache_names()? {
      if name == self.cache_name {
        continue;
      }
      if self.storage.delete_cache(&name)? {
        info!(cache = %name, "deleted stale cache generation");
        deleted.push(name);
      }
    }

    Ok(deleted)
  }

  /// Serve a GET request.
  ///
  /// Offline: cache first, network as a fallback.
  /// Online: network first, caching 200 responses; cache on network failure.
  /// `None` means neither source had an answer.
  pub async fn serve_get(&self, request: &HttpRequest) -> Option<Served> {
    if !self.connectivity.is_online() {
      if let Some(hit) = self.lookup(&request.url) {
        debug!(url = %request.url, "offline: served from cache");
        return Some(hit);
      }

      return match self.network.fetch(request).await {
        Ok(response) => Some(Served::from_network(response)),
        Err(e) => {
          debug!(url = %request.url, error = %e, "offline: cache miss and network unavailable");
          None
        }
      };
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          self.store(&request.url, &response);
        }
        Some(Served::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "network failed, falling back to cache");
        self.lookup(&request.url)
      }
    }
  }

  /// Best-effort write; a failure only costs future offline availability.
  fn store(&self, url: &str, response: &HttpResponse) {
    if let Err(e) = self.storage.put(&self.cache_name, url, response) {
      warn!(url, error = %e, "failed to cache response");
    }
  }

  fn lookup(&self, url: &str) -> Option<Served> {
    match self.storage.lookup(&self.cache_name, url) {
      Ok(hit) => hit.map(|c| Served::from_cache(c.response, c.cached_at)),
      Err(e) => {
        warn!(url, error = %e, "cache lookup failed");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{CachedResponse, SqliteCacheStorage};
  use crate::cache::ResponseSource;
  use crate::db::Database;
  use crate::testing::{Reply, ScriptedNetwork};

  const ORIGIN: &str = "https://field.example.com";

  fn config(manifest: &[&str]) -> CacheConfig {
    CacheConfig {
      version: "cache-v2".to_string(),
      manifest: manifest.iter().map(|s| s.to_string()).collect(),
    }
  }

  fn manager_with<S: CacheStorage>(
    storage: Arc<S>,
    network: &ScriptedNetwork,
    online: bool,
  ) -> CacheManager<S, ScriptedNetwork> {
    CacheManager::new(
      &config(&["/", "/index.html", "/static/js/main.js"]),
      Url::parse(ORIGIN).unwrap(),
      storage,
      Arc::new(network.clone()),
      Connectivity::new(online),
    )
  }

  fn sqlite() -> Arc<SqliteCacheStorage> {
    Arc::new(SqliteCacheStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )))
  }

  /// Storage whose writes always fail.
  struct ReadOnlyStorage;

  impl CacheStorage for ReadOnlyStorage {
    fn cache_names(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }
    fn delete_cache(&self, _name: &str) -> Result<bool> {
      Ok(false)
    }
    fn put(&self, _cache_name: &str, _url: &str, _response: &HttpResponse) -> Result<()> {
      Err(eyre!("disk full"))
    }
    fn put_all(&self, _cache_name: &str, _entries: &[(String, HttpResponse)]) -> Result<()> {
      Err(eyre!("disk full"))
    }
    fn lookup(&self, _cache_name: &str, _url: &str) -> Result<Option<CachedResponse>> {
      Ok(None)
    }
  }

  #[tokio::test]
  async fn test_install_caches_whole_manifest() {
    let storage = sqlite();
    let network = ScriptedNetwork::new();
    let manager = manager_with(Arc::clone(&storage), &network, true);

    assert_eq!(manager.install().await.unwrap(), 3);
    for url in manager.manifest_urls().unwrap() {
      assert!(storage.lookup("cache-v2", &url).unwrap().is_some(), "{url} missing");
    }
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let storage = sqlite();
    let network = ScriptedNetwork::new();
    network.reply(
      "https://field.example.com/static/js/main.js",
      Reply::Status(404, "missing"),
    );
    let manager = manager_with(Arc::clone(&storage), &network, true);

    assert!(manager.install().await.is_err());
    assert!(storage.cache_names().unwrap().is_empty());
    assert!(storage
      .lookup("cache-v2", "https://field.example.com/index.html")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_activate_purges_old_generations_once() {
    let storage = sqlite();
    let page = HttpResponse::new(200).with_body(b"x".to_vec());
    storage.put("cache-v1", "https://field.example.com/", &page).unwrap();
    storage.put("cache-v1.5", "https://field.example.com/", &page).unwrap();
    storage.put("cache-v2", "https://field.example.com/", &page).unwrap();

    let manager = manager_with(Arc::clone(&storage), &ScriptedNetwork::new(), true);

    let mut first = manager.activate().unwrap();
    first.sort();
    assert_eq!(first, vec!["cache-v1".to_string(), "cache-v1.5".to_string()]);

    assert!(manager.activate().unwrap().is_empty());
    assert_eq!(storage.cache_names().unwrap(), vec!["cache-v2".to_string()]);
  }

  #[tokio::test]
  async fn test_offline_get_served_from_cache_without_network() {
    let storage = sqlite();
    let url = "https://field.example.com/index.html";
    storage
      .put("cache-v2", url, &HttpResponse::new(200).with_body(b"<app>".to_vec()))
      .unwrap();
    let network = ScriptedNetwork::new();
    let manager = manager_with(storage, &network, false);

    let served = manager.serve_get(&HttpRequest::get(url)).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body_text(), "<app>");
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_offline_miss_falls_back_to_network() {
    let network = ScriptedNetwork::new();
    let url = "https://field.example.com/api/leases";
    network.reply(url, Reply::Status(200, "[]"));
    let manager = manager_with(sqlite(), &network, false);

    let served = manager.serve_get(&HttpRequest::get(url)).await.unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(network.urls(), vec![url.to_string()]);
  }

  #[tokio::test]
  async fn test_online_get_caches_only_200() {
    let storage = sqlite();
    let network = ScriptedNetwork::new();
    network
      .reply("https://api/ok", Reply::Status(200, "fresh"))
      .reply("https://api/gone", Reply::Status(404, "nope"));
    let manager = manager_with(Arc::clone(&storage), &network, true);

    let ok = manager.serve_get(&HttpRequest::get("https://api/ok")).await.unwrap();
    assert_eq!(ok.source, ResponseSource::Network);
    let gone = manager.serve_get(&HttpRequest::get("https://api/gone")).await.unwrap();
    assert_eq!(gone.response.status, 404);

    assert!(storage.lookup("cache-v2", "https://api/ok").unwrap().is_some());
    assert!(storage.lookup("cache-v2", "https://api/gone").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_online_network_failure_falls_back_to_cache() {
    let storage = sqlite();
    let network = ScriptedNetwork::new();
    network
      .reply("https://api/wells", Reply::Status(200, "v1"))
      .reply("https://api/wells", Reply::Fail);
    let manager = manager_with(storage, &network, true);

    manager.serve_get(&HttpRequest::get("https://api/wells")).await.unwrap();
    let served = manager.serve_get(&HttpRequest::get("https://api/wells")).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body_text(), "v1");
  }

  #[tokio::test]
  async fn test_online_failure_with_empty_cache_finds_nothing() {
    let network = ScriptedNetwork::new();
    network.reply("https://api/x", Reply::Fail);
    let manager = manager_with(sqlite(), &network, true);
    assert!(manager.serve_get(&HttpRequest::get("https://api/x")).await.is_none());
  }

  #[tokio::test]
  async fn test_cache_write_failure_still_returns_response() {
    let network = ScriptedNetwork::new();
    network.reply("https://api/ok", Reply::Status(200, "body"));
    let manager = manager_with(Arc::new(ReadOnlyStorage), &network, true);

    let served = manager.serve_get(&HttpRequest::get("https://api/ok")).await.unwrap();
    assert_eq!(served.response.body_text(), "body");
  }
}

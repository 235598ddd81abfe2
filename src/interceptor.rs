//! The caching interceptor: install-time pre-caching and per-request
//! cache-or-network resolution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::http::{Fetcher, Request, Response};
use crate::manifest::AssetManifest;

/// Interceptor lifecycle states.
///
/// The transition is one-way and happens at most once, on a successful
/// install. There is no re-installation: a host that wants a new manifest
/// restarts the whole process in a fresh `Uninstalled` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// No cache populated yet; every request falls through to the network.
  Uninstalled,
  /// Cache populated; requests are served cache-or-network.
  Installed,
}

/// The caching interceptor.
///
/// Owns a single named cache within the storage backend and answers the two
/// lifecycle events of its host: [`on_install`](Self::on_install) and
/// [`on_intercept`](Self::on_intercept).
pub struct Interceptor<S: CacheStorage> {
  cache_name: String,
  scope: Url,
  manifest: AssetManifest,
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  installed: AtomicBool,
}

impl<S: CacheStorage> Interceptor<S> {
  /// Build an interceptor from its configuration, a storage backend and a
  /// fetcher.
  ///
  /// The cache name and manifest must be non-empty and the scope must be an
  /// absolute URL; an interceptor with nothing to cache is a configuration
  /// error, not a valid degenerate state.
  pub fn new(config: &Config, storage: S, fetcher: impl Fetcher + 'static) -> Result<Self> {
    if config.cache_name.is_empty() {
      return Err(eyre!("Cache name must not be empty"));
    }
    if config.assets.is_empty() {
      return Err(eyre!("Asset manifest must not be empty"));
    }

    let scope = Url::parse(&config.scope)
      .map_err(|e| eyre!("Invalid scope URL {}: {}", config.scope, e))?;

    Ok(Self {
      cache_name: config.cache_name.clone(),
      scope,
      manifest: AssetManifest::new(config.assets.clone()),
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      installed: AtomicBool::new(false),
    })
  }

  /// The name of the cache this interceptor owns.
  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  /// A handle to the underlying storage backend.
  pub fn storage(&self) -> Arc<S> {
    Arc::clone(&self.storage)
  }

  /// Current lifecycle state.
  pub fn lifecycle(&self) -> Lifecycle {
    if self.installed.load(Ordering::Acquire) {
      Lifecycle::Installed
    } else {
      Lifecycle::Uninstalled
    }
  }

  /// Handle the install lifecycle event.
  ///
  /// Opens (creating if absent) the named cache, then fetches and stores
  /// every manifest asset as a single batch. The returned future is what the
  /// host waits on before treating the interceptor as active; this is the
  /// only cross-event ordering contract.
  ///
  /// The batch is fail-fast and all-or-nothing: the first asset that cannot
  /// be fetched, or that comes back with a non-success status, fails the
  /// whole install, nothing from the batch persists, and the state stays
  /// `Uninstalled`. There is no per-asset retry.
  pub async fn on_install(&self) -> Result<()> {
    self.storage.open_cache(&self.cache_name)?;
    info!(cache = %self.cache_name, "opened cache");

    let urls = self.manifest.resolve(&self.scope)?;

    // One unit of work: the first failure cancels the rest of the batch.
    let fetches = urls.iter().map(|url| self.precache(url));
    let entries = future::try_join_all(fetches).await?;

    self.storage.put_batch(&self.cache_name, &entries)?;
    debug!(cache = %self.cache_name, assets = entries.len(), "manifest stored");

    self.installed.store(true, Ordering::Release);
    Ok(())
  }

  /// Fetch one manifest asset for installation.
  async fn precache(&self, url: &Url) -> Result<(String, Response)> {
    let request = Request::get(url.clone());

    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Failed to pre-cache {}: {}", url, e))?;

    if !response.is_success() {
      return Err(eyre!(
        "Failed to pre-cache {}: server answered {}",
        url,
        response.status
      ));
    }

    Ok((request.cache_key(), response))
  }

  /// Handle the fetch (request interception) lifecycle event.
  ///
  /// Returns the stored response on a cache hit without touching the
  /// network; otherwise performs exactly one live fetch and returns its
  /// outcome (a response of any status, or a transport error) unmodified.
  ///
  /// Responses fetched on a miss are never written back: the cache only ever
  /// reflects the install-time manifest. Callable in either lifecycle state;
  /// before installation the cache is simply empty.
  pub async fn on_intercept(&self, request: &Request) -> Result<Response> {
    let key = request.cache_key();

    if let Some(cached) = self.storage.match_request(&self.cache_name, &key)? {
      debug!(url = %request.url, "cache hit");
      return Ok(cached.response);
    }

    debug!(url = %request.url, "cache miss, fetching from network");
    self.fetcher.fetch(request).await
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use futures::future::BoxFuture;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// Scripted fetcher that records every request it serves.
  struct ScriptedFetcher {
    responses: HashMap<String, Response>,
    failures: Vec<String>,
    log: Arc<Mutex<Vec<String>>>,
  }

  impl ScriptedFetcher {
    fn new() -> Self {
      Self {
        responses: HashMap::new(),
        failures: Vec::new(),
        log: Arc::new(Mutex::new(Vec::new())),
      }
    }

    fn respond(mut self, url: &str, response: Response) -> Self {
      self.responses.insert(url.to_string(), response);
      self
    }

    fn fail(mut self, url: &str) -> Self {
      self.failures.push(url.to_string());
      self
    }

    /// Shared handle to the list of URLs fetched so far.
    fn log(&self) -> Arc<Mutex<Vec<String>>> {
      Arc::clone(&self.log)
    }
  }

  impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
      Box::pin(async move {
        let url = request.url.to_string();
        self.log.lock().expect("log lock").push(url.clone());

        if self.failures.contains(&url) {
          return Err(eyre!("connection refused: {}", url));
        }

        self
          .responses
          .get(&url)
          .cloned()
          .ok_or_else(|| eyre!("no scripted response for {}", url))
      })
    }
  }

  fn text_response(body: &str) -> Response {
    Response {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  fn test_config() -> Config {
    Config {
      cache_name: "counter-app-v1".to_string(),
      scope: "https://app.example/".to_string(),
      assets: vec![
        "./".to_string(),
        "./index.html".to_string(),
        "https://cdn.example/core.js".to_string(),
      ],
    }
  }

  fn scripted_for_manifest() -> ScriptedFetcher {
    ScriptedFetcher::new()
      .respond("https://app.example/", text_response("root"))
      .respond("https://app.example/index.html", text_response("index"))
      .respond("https://cdn.example/core.js", text_response("core"))
  }

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).expect("request url"))
  }

  #[tokio::test]
  async fn test_install_populates_every_manifest_url() {
    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), scripted_for_manifest())
        .expect("interceptor");

    assert_eq!(interceptor.lifecycle(), Lifecycle::Uninstalled);
    interceptor.on_install().await.expect("install");
    assert_eq!(interceptor.lifecycle(), Lifecycle::Installed);

    let storage = interceptor.storage();
    for key in [
      "https://app.example/",
      "https://app.example/index.html",
      "https://cdn.example/core.js",
    ] {
      let cached = storage
        .match_request("counter-app-v1", key)
        .expect("match")
        .unwrap_or_else(|| panic!("{} missing from cache", key));
      assert_eq!(cached.response.status, 200);
    }
  }

  #[tokio::test]
  async fn test_install_stores_what_the_fetch_returned() {
    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), scripted_for_manifest())
        .expect("interceptor");

    interceptor.on_install().await.expect("install");

    let cached = interceptor
      .storage()
      .match_request("counter-app-v1", "https://app.example/index.html")
      .expect("match")
      .expect("entry present");

    assert_eq!(cached.response, text_response("index"));
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing_on_transport_failure() {
    let fetcher = ScriptedFetcher::new()
      .respond("https://app.example/", text_response("root"))
      .respond("https://cdn.example/core.js", text_response("core"))
      .fail("https://app.example/index.html");

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");

    let result = interceptor.on_install().await;

    assert!(result.is_err());
    assert_eq!(interceptor.lifecycle(), Lifecycle::Uninstalled);

    // Nothing from the failed batch is observable, not even the assets that
    // fetched fine
    let storage = interceptor.storage();
    for key in [
      "https://app.example/",
      "https://app.example/index.html",
      "https://cdn.example/core.js",
    ] {
      assert!(storage
        .match_request("counter-app-v1", key)
        .expect("match")
        .is_none());
    }
  }

  #[tokio::test]
  async fn test_install_rejects_error_status_assets() {
    let fetcher = ScriptedFetcher::new()
      .respond("https://app.example/", text_response("root"))
      .respond("https://app.example/index.html", Response {
        status: 404,
        headers: Vec::new(),
        body: b"not found".to_vec(),
      })
      .respond("https://cdn.example/core.js", text_response("core"));

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");

    let err = interceptor.on_install().await.unwrap_err();

    assert!(err.to_string().contains("https://app.example/index.html"));
    assert_eq!(interceptor.lifecycle(), Lifecycle::Uninstalled);
  }

  #[tokio::test]
  async fn test_intercept_hit_skips_network() {
    let fetcher = scripted_for_manifest();
    let log = fetcher.log();

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");
    interceptor.on_install().await.expect("install");

    log.lock().expect("log lock").clear();

    let response = interceptor
      .on_intercept(&request("https://app.example/index.html"))
      .await
      .expect("intercept");

    assert_eq!(response.body, b"index");
    assert!(log.lock().expect("log lock").is_empty(), "hit must not fetch");
  }

  #[tokio::test]
  async fn test_intercept_matches_ignoring_fragment() {
    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), scripted_for_manifest())
        .expect("interceptor");
    interceptor.on_install().await.expect("install");

    let response = interceptor
      .on_intercept(&request("https://app.example/index.html#counter"))
      .await
      .expect("intercept");

    assert_eq!(response.body, b"index");
  }

  #[tokio::test]
  async fn test_intercept_miss_fetches_once_and_returns_verbatim() {
    let fetcher = scripted_for_manifest().respond(
      "https://app.example/api/counter",
      Response {
        status: 203,
        headers: vec![("x-served-by".to_string(), "origin".to_string())],
        body: b"42".to_vec(),
      },
    );
    let log = fetcher.log();

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");
    interceptor.on_install().await.expect("install");

    log.lock().expect("log lock").clear();

    let response = interceptor
      .on_intercept(&request("https://app.example/api/counter"))
      .await
      .expect("intercept");

    assert_eq!(response.status, 203);
    assert_eq!(response.header("x-served-by"), Some("origin"));
    assert_eq!(response.body, b"42");
    assert_eq!(
      log.lock().expect("log lock").as_slice(),
      ["https://app.example/api/counter"]
    );
  }

  #[tokio::test]
  async fn test_intercept_miss_is_not_written_back() {
    let fetcher =
      scripted_for_manifest().respond("https://app.example/api/counter", text_response("42"));
    let log = fetcher.log();

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");
    interceptor.on_install().await.expect("install");

    interceptor
      .on_intercept(&request("https://app.example/api/counter"))
      .await
      .expect("first intercept");

    // Still no cache entry after a successful network fallback
    assert!(interceptor
      .storage()
      .match_request("counter-app-v1", "https://app.example/api/counter")
      .expect("match")
      .is_none());

    log.lock().expect("log lock").clear();
    interceptor
      .on_intercept(&request("https://app.example/api/counter"))
      .await
      .expect("second intercept");
    assert_eq!(log.lock().expect("log lock").len(), 1, "every miss refetches");
  }

  #[tokio::test]
  async fn test_intercept_propagates_network_failure_on_miss() {
    let fetcher = scripted_for_manifest().fail("https://app.example/api/counter");

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");
    interceptor.on_install().await.expect("install");

    let result = interceptor
      .on_intercept(&request("https://app.example/api/counter"))
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_intercept_error_status_is_returned_unmodified() {
    let fetcher = scripted_for_manifest().respond(
      "https://app.example/gone",
      Response {
        status: 410,
        headers: Vec::new(),
        body: Vec::new(),
      },
    );

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");
    interceptor.on_install().await.expect("install");

    let response = interceptor
      .on_intercept(&request("https://app.example/gone"))
      .await
      .expect("intercept");

    assert_eq!(response.status, 410);
  }

  #[tokio::test]
  async fn test_intercept_before_install_falls_through() {
    let fetcher =
      ScriptedFetcher::new().respond("https://app.example/index.html", text_response("live"));

    let interceptor =
      Interceptor::new(&test_config(), MemoryStorage::new(), fetcher).expect("interceptor");

    let response = interceptor
      .on_intercept(&request("https://app.example/index.html"))
      .await
      .expect("intercept");

    assert_eq!(response.body, b"live");
    assert_eq!(interceptor.lifecycle(), Lifecycle::Uninstalled);
  }

  #[test]
  fn test_new_rejects_empty_cache_name() {
    let config = Config {
      cache_name: String::new(),
      ..test_config()
    };

    let result = Interceptor::new(&config, MemoryStorage::new(), ScriptedFetcher::new());

    assert!(result.is_err());
  }

  #[test]
  fn test_new_rejects_empty_manifest() {
    let config = Config {
      assets: Vec::new(),
      ..test_config()
    };

    let result = Interceptor::new(&config, MemoryStorage::new(), ScriptedFetcher::new());

    assert!(result.is_err());
  }

  #[test]
  fn test_new_rejects_relative_scope() {
    let config = Config {
      scope: "./counter/".to_string(),
      ..test_config()
    };

    let result = Interceptor::new(&config, MemoryStorage::new(), ScriptedFetcher::new());

    assert!(result.is_err());
  }
}

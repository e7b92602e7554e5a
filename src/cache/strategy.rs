//! Network-first fetch strategy.

use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{FetchDisposition, StrategyResponse};
use crate::http::{Request, Response};
use crate::network::Network;

/// Network-first request handling.
///
/// Live data is preferred whenever the network answers; the cache is only
/// consulted when the live fetch fails:
///
/// 1. Bypassed requests (non-HTTP, URLs containing a bypass pattern or
///    starting with a bypassed service prefix) are not handled at all
/// 2. Live fetch; successful GET responses are written through to the
///    current cache generation
/// 3. On failure: cached response, else the app shell document for HTML
///    navigations, else a synthesized 503
pub struct NetworkFirst<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  /// Generation written to when none has been installed yet
  default_generation: String,
  bypass: Vec<String>,
  /// Service base URLs; anything under them is live data
  bypass_prefixes: Vec<String>,
  offline_document: Url,
}

impl<S: CacheStorage> NetworkFirst<S> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Network>,
    default_generation: impl Into<String>,
    bypass: Vec<String>,
    offline_document: Url,
  ) -> Self {
    Self {
      storage,
      network,
      default_generation: default_generation.into(),
      bypass,
      bypass_prefixes: Vec::new(),
      offline_document,
    }
  }

  /// Also bypass every URL under the given prefixes.
  pub fn with_bypass_prefixes(mut self, prefixes: Vec<String>) -> Self {
    self.bypass_prefixes = prefixes;
    self
  }

  /// Whether the request is excluded from the strategy.
  pub fn should_bypass(&self, request: &Request) -> bool {
    if !request.is_http() {
      return true;
    }
    let url = request.url.as_str();
    self.bypass.iter().any(|pattern| url.contains(pattern.as_str()))
      || self
        .bypass_prefixes
        .iter()
        .any(|prefix| url.starts_with(prefix.as_str()))
  }

  /// Handle an intercepted request.
  pub async fn handle(&self, request: &Request) -> FetchDisposition {
    if self.should_bypass(request) {
      debug!(identity = %request.identity(), "bypassing worker");
      return FetchDisposition::Bypass;
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if request.method == Method::GET && response.is_success() {
          self.write_through(request, &response);
        }
        FetchDisposition::Respond(StrategyResponse::from_network(response))
      }
      Err(e) => {
        warn!(identity = %request.identity(), error = %e, "live fetch failed, falling back to cache");
        FetchDisposition::Respond(self.fallback(request))
      }
    }
  }

  fn generation(&self) -> String {
    match self.storage.current() {
      Ok(Some(name)) => name,
      Ok(None) => self.default_generation.clone(),
      Err(e) => {
        warn!(error = %e, "failed to read current cache generation");
        self.default_generation.clone()
      }
    }
  }

  fn write_through(&self, request: &Request, response: &Response) {
    let generation = self.generation();
    match self.storage.put(&generation, request, response) {
      Ok(true) => debug!(identity = %request.identity(), %generation, "cached live response"),
      Ok(false) => {
        debug!(identity = %request.identity(), %generation, "generation superseded, not cached")
      }
      // A failed cache write never affects the live response
      Err(e) => warn!(identity = %request.identity(), error = %e, "failed to cache response"),
    }
  }

  fn lookup(&self, generation: &str, request: &Request) -> Option<Response> {
    match self.storage.lookup(generation, request) {
      Ok(entry) => entry.map(|e| e.response),
      Err(e) => {
        warn!(identity = %request.identity(), error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn fallback(&self, request: &Request) -> StrategyResponse {
    let generation = self.generation();

    if let Some(response) = self.lookup(&generation, request) {
      return StrategyResponse::from_cache(response);
    }

    if request.accepts_html() {
      let shell = Request::get(self.offline_document.clone());
      if let Some(response) = self.lookup(&generation, &shell) {
        return StrategyResponse::offline_shell(response);
      }
    }

    StrategyResponse::unavailable()
  }
}

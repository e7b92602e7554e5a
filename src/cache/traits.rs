//! Result types for the fetch strategy.

use crate::http::Response;

/// Indicates where a strategy response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Network failed, served from the current cache generation
  Cache,
  /// Network failed on an HTML navigation, served the cached app shell document
  OfflineShell,
  /// Network failed and nothing usable was cached
  Unavailable,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::OfflineShell => "offline-shell",
      Self::Unavailable => "unavailable",
    }
  }
}

/// Response produced by the strategy, including where it came from.
#[derive(Debug, Clone)]
pub struct StrategyResponse {
  pub response: Response,
  pub source: ResponseSource,
}

impl StrategyResponse {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn offline_shell(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::OfflineShell,
    }
  }

  pub fn unavailable() -> Self {
    Self {
      response: Response::service_unavailable(),
      source: ResponseSource::Unavailable,
    }
  }
}

/// What the worker does with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
  /// Not handled; the caller performs the request unmodified and uncached
  Bypass,
  /// Handled by the strategy
  Respond(StrategyResponse),
}
